pub mod approval;

pub use approval::{
    ActionKindRiskAssessor, ApprovalBroker, ApprovalDecision, ApprovalGate, ApprovalPolicy,
    ApprovalRequest, ApprovalSender, AutoApproveBroker, ChannelApprovalBroker,
    CliApprovalBroker, GateOutcome, RiskAssessor, RiskLevel,
};
