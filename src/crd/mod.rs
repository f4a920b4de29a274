//! Custom Resource Definitions for the PVC remediator

mod remediation_policy;
pub mod types;


pub use remediation_policy::{RemediationPolicy, RemediationPolicySpec, RemediationPolicyStatus};
pub use types::{Condition, Severity};
