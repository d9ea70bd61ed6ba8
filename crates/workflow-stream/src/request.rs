use serde_json::{Map, Value};

/// Candidate reference carried in the request.
///
/// The kind is fixed when the reference is built; nothing downstream infers
/// it from the shape of an id.
#[derive(Clone, Debug, PartialEq, Eq, serde::Serialize, serde::Deserialize)]
#[serde(tag = "kind", rename_all = "snake_case")]
pub enum CandidateRef {
    /// A stored candidate profile.
    Candidate { id: String, name: String },
    /// A resume uploaded without a candidate profile.
    StandaloneResume { resume_id: String, name: String },
}

impl CandidateRef {
    pub fn candidate(id: impl Into<String>, name: impl Into<String>) -> Self {
        Self::Candidate {
            id: id.into(),
            name: name.into(),
        }
    }

    pub fn standalone_resume(resume_id: impl Into<String>, name: impl Into<String>) -> Self {
        Self::StandaloneResume {
            resume_id: resume_id.into(),
            name: name.into(),
        }
    }

    pub fn name(&self) -> &str {
        match self {
            Self::Candidate { name, .. } | Self::StandaloneResume { name, .. } => name,
        }
    }

    /// Id of a stored candidate; `None` for standalone resumes.
    pub fn candidate_id(&self) -> Option<&str> {
        match self {
            Self::Candidate { id, .. } => Some(id),
            Self::StandaloneResume { .. } => None,
        }
    }
}

/// Body of the workflow-generation POST.
///
/// `job_metadata`, `step_overrides` and any `extra` keys are opaque to this
/// crate and forwarded as-is.
#[derive(Clone, Debug, Default, PartialEq, serde::Serialize, serde::Deserialize)]
pub struct WorkflowRequest {
    pub job_description: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub job_metadata: Option<Value>,
    #[serde(default)]
    pub candidates: Vec<CandidateRef>,
    #[serde(default)]
    pub resumes: Vec<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub step_overrides: Option<Value>,
    #[serde(flatten)]
    pub extra: Map<String, Value>,
}

impl WorkflowRequest {
    pub fn new(job_description: impl Into<String>) -> Self {
        Self {
            job_description: job_description.into(),
            ..Self::default()
        }
    }

    pub fn job_metadata(mut self, metadata: Value) -> Self {
        self.job_metadata = Some(metadata);
        self
    }

    pub fn candidate(mut self, candidate: CandidateRef) -> Self {
        if let CandidateRef::StandaloneResume { resume_id, .. } = &candidate
            && !self.resumes.contains(resume_id)
        {
            self.resumes.push(resume_id.clone());
        }
        self.candidates.push(candidate);
        self
    }

    pub fn resume(mut self, resume_id: impl Into<String>) -> Self {
        self.resumes.push(resume_id.into());
        self
    }

    pub fn step_overrides(mut self, overrides: Value) -> Self {
        self.step_overrides = Some(overrides);
        self
    }
}

/// Display metadata stored on the run record.
#[derive(Clone, Debug, Default, PartialEq, Eq, serde::Serialize, serde::Deserialize)]
pub struct RunMeta {
    pub candidate_name: String,
    pub job_title: String,
    pub resume_ids: Vec<String>,
}

impl RunMeta {
    pub fn new(candidate_name: impl Into<String>, job_title: impl Into<String>) -> Self {
        Self {
            candidate_name: candidate_name.into(),
            job_title: job_title.into(),
            resume_ids: Vec::new(),
        }
    }

    /// Derives metadata from a request.
    ///
    /// The job title comes from `job_metadata.title`; several candidates are
    /// summarized as a count.
    pub fn for_request(request: &WorkflowRequest) -> Self {
        let candidate_name = match request.candidates.as_slice() {
            [] => String::new(),
            [only] => only.name().to_string(),
            many => format!("{} candidates", many.len()),
        };
        let job_title = request
            .job_metadata
            .as_ref()
            .and_then(|m| m.get("title"))
            .and_then(Value::as_str)
            .unwrap_or_default()
            .to_string();
        Self {
            candidate_name,
            job_title,
            resume_ids: request.resumes.clone(),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn candidate_refs_serialize_with_kind_tag() {
        let value = serde_json::to_value(CandidateRef::standalone_resume("r-9", "Lin")).expect("serialize");
        assert_eq!(
            value,
            json!({"kind": "standalone_resume", "resume_id": "r-9", "name": "Lin"})
        );
        let parsed: CandidateRef =
            serde_json::from_value(json!({"kind": "candidate", "id": "65f0c0ffee", "name": "Ada"}))
                .expect("deserialize");
        assert_eq!(parsed.candidate_id(), Some("65f0c0ffee"));
    }

    #[test]
    fn request_forwards_opaque_fields() {
        let request: WorkflowRequest = serde_json::from_value(json!({
            "job_description": "Build pipelines",
            "step_overrides": {"ranked_shortlist": {"provider": "local"}},
            "tenant": "acme"
        }))
        .expect("deserialize");
        assert_eq!(request.extra.get("tenant"), Some(&json!("acme")));
        let body = serde_json::to_value(&request).expect("serialize");
        assert_eq!(body["tenant"], json!("acme"));
        assert_eq!(body["step_overrides"]["ranked_shortlist"]["provider"], json!("local"));
        assert!(body.get("job_metadata").is_none());
    }

    #[test]
    fn meta_is_derived_from_request() {
        let request = WorkflowRequest::new("jd")
            .job_metadata(json!({"title": "Data Engineer"}))
            .candidate(CandidateRef::standalone_resume("r1", "Ada"));
        let meta = RunMeta::for_request(&request);
        assert_eq!(meta.candidate_name, "Ada");
        assert_eq!(meta.job_title, "Data Engineer");
        assert_eq!(meta.resume_ids, vec!["r1".to_string()]);

        let many = request.candidate(CandidateRef::candidate("c2", "Lin"));
        assert_eq!(RunMeta::for_request(&many).candidate_name, "2 candidates");
    }
}
