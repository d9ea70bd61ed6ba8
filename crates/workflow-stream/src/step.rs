use std::fmt;

/// One stage of the analysis pipeline, in published order.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash, PartialOrd, Ord, serde::Serialize, serde::Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum WorkflowStep {
    CoreSkills,
    AiAnalysis,
    RankedShortlist,
    DetailedReadout,
    EngagementPlan,
    FairnessGuidance,
    InterviewPrep,
}

impl WorkflowStep {
    /// Fixed order in which the backend runs the steps.
    pub const ORDER: [WorkflowStep; 7] = [
        WorkflowStep::CoreSkills,
        WorkflowStep::AiAnalysis,
        WorkflowStep::RankedShortlist,
        WorkflowStep::DetailedReadout,
        WorkflowStep::EngagementPlan,
        WorkflowStep::FairnessGuidance,
        WorkflowStep::InterviewPrep,
    ];

    pub fn as_str(self) -> &'static str {
        match self {
            Self::CoreSkills => "core_skills",
            Self::AiAnalysis => "ai_analysis",
            Self::RankedShortlist => "ranked_shortlist",
            Self::DetailedReadout => "detailed_readout",
            Self::EngagementPlan => "engagement_plan",
            Self::FairnessGuidance => "fairness_guidance",
            Self::InterviewPrep => "interview_prep",
        }
    }

    /// Position of the step in [`WorkflowStep::ORDER`].
    pub fn index(self) -> usize {
        Self::ORDER
            .iter()
            .position(|step| *step == self)
            .unwrap_or(Self::ORDER.len())
    }

    /// Resolves a wire step name. Field names resolve to the step that owns them.
    pub fn from_wire(name: &str) -> Option<Self> {
        Self::ORDER
            .into_iter()
            .find(|step| step.as_str() == name)
            .or_else(|| ResultField::from_wire(name).map(ResultField::step))
    }

    /// Phase of `self` given the step currently reported by the stream.
    ///
    /// `finished` marks a session that reached a terminal state, in which case
    /// every step reads as done.
    pub fn phase(self, current: Option<WorkflowStep>, finished: bool) -> StepPhase {
        if finished {
            return StepPhase::Done;
        }
        match current {
            None => StepPhase::Waiting,
            Some(current) if self.index() < current.index() => StepPhase::Done,
            Some(current) if self == current => StepPhase::InProgress,
            Some(_) => StepPhase::Waiting,
        }
    }
}

impl fmt::Display for WorkflowStep {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Rendering affordance for a single step.
#[derive(Clone, Copy, Debug, PartialEq, Eq, serde::Serialize, serde::Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum StepPhase {
    Waiting,
    InProgress,
    Done,
}

/// Denormalized field of a [`crate::WorkflowResult`].
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash, PartialOrd, Ord, serde::Serialize, serde::Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ResultField {
    CoreSkills,
    AiAnalysisMarkdown,
    CandidateAnalysis,
    RankedShortlist,
    DetailedReadout,
    EngagementPlan,
    FairnessGuidance,
    InterviewPreparation,
}

impl ResultField {
    pub const ALL: [ResultField; 8] = [
        ResultField::CoreSkills,
        ResultField::AiAnalysisMarkdown,
        ResultField::CandidateAnalysis,
        ResultField::RankedShortlist,
        ResultField::DetailedReadout,
        ResultField::EngagementPlan,
        ResultField::FairnessGuidance,
        ResultField::InterviewPreparation,
    ];

    /// Key used for this field in `complete` payloads.
    pub fn key(self) -> &'static str {
        match self {
            Self::CoreSkills => "core_skills",
            Self::AiAnalysisMarkdown => "ai_analysis_markdown",
            Self::CandidateAnalysis => "candidate_analysis",
            Self::RankedShortlist => "ranked_shortlist",
            Self::DetailedReadout => "detailed_readout",
            Self::EngagementPlan => "engagement_plan",
            Self::FairnessGuidance => "fairness_guidance",
            Self::InterviewPreparation => "interview_preparation",
        }
    }

    pub fn step(self) -> WorkflowStep {
        match self {
            Self::CoreSkills => WorkflowStep::CoreSkills,
            Self::AiAnalysisMarkdown | Self::CandidateAnalysis => WorkflowStep::AiAnalysis,
            Self::RankedShortlist => WorkflowStep::RankedShortlist,
            Self::DetailedReadout => WorkflowStep::DetailedReadout,
            Self::EngagementPlan => WorkflowStep::EngagementPlan,
            Self::FairnessGuidance => WorkflowStep::FairnessGuidance,
            Self::InterviewPreparation => WorkflowStep::InterviewPrep,
        }
    }

    /// The markdown field holds text; all others hold sequences.
    pub fn is_text(self) -> bool {
        matches!(self, Self::AiAnalysisMarkdown)
    }

    /// Resolves the field a `partial`/`result` event for `name` writes to.
    ///
    /// Step names alias to the step's primary field (`ai_analysis` writes the
    /// markdown, `interview_prep` writes `interview_preparation`).
    pub fn from_wire(name: &str) -> Option<Self> {
        match name {
            "ai_analysis" => Some(Self::AiAnalysisMarkdown),
            "interview_prep" => Some(Self::InterviewPreparation),
            other => Self::ALL.into_iter().find(|field| field.key() == other),
        }
    }
}

impl fmt::Display for ResultField {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.key())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn wire_names_resolve_to_steps_and_fields() {
        assert_eq!(WorkflowStep::from_wire("ai_analysis"), Some(WorkflowStep::AiAnalysis));
        assert_eq!(
            WorkflowStep::from_wire("candidate_analysis"),
            Some(WorkflowStep::AiAnalysis)
        );
        assert_eq!(
            WorkflowStep::from_wire("interview_preparation"),
            Some(WorkflowStep::InterviewPrep)
        );
        assert_eq!(WorkflowStep::from_wire("unknown_step"), None);

        assert_eq!(
            ResultField::from_wire("ai_analysis"),
            Some(ResultField::AiAnalysisMarkdown)
        );
        assert_eq!(
            ResultField::from_wire("interview_prep"),
            Some(ResultField::InterviewPreparation)
        );
        assert_eq!(
            ResultField::from_wire("ranked_shortlist"),
            Some(ResultField::RankedShortlist)
        );
    }

    #[test]
    fn phase_compares_against_fixed_order() {
        let current = Some(WorkflowStep::RankedShortlist);
        assert_eq!(WorkflowStep::CoreSkills.phase(current, false), StepPhase::Done);
        assert_eq!(
            WorkflowStep::RankedShortlist.phase(current, false),
            StepPhase::InProgress
        );
        assert_eq!(
            WorkflowStep::InterviewPrep.phase(current, false),
            StepPhase::Waiting
        );
        assert_eq!(WorkflowStep::CoreSkills.phase(None, false), StepPhase::Waiting);
        assert_eq!(WorkflowStep::InterviewPrep.phase(None, true), StepPhase::Done);
    }

    #[test]
    fn order_indices_are_sequential() {
        for (i, step) in WorkflowStep::ORDER.into_iter().enumerate() {
            assert_eq!(step.index(), i);
        }
    }
}
