//! Shared helper for the `Ready`/`ParamsReady` style status conditions C4
//! publishes on `Network` and `GKENetworkParamSet` objects.

use chrono::Utc;
use k8s_openapi::apimachinery::pkg::apis::meta::v1::{Condition, Time};

/// Inserts or updates `type_` in `conditions`, bumping
/// `last_transition_time` only when the status actually flipped — matching
/// how the Kubernetes API conventions define condition semantics.
pub fn upsert_condition(conditions: &mut Vec<Condition>, type_: &str, status: bool, reason: &str, message: &str) {
    let status_str = if status { "True" } else { "False" };
    if let Some(existing) = conditions.iter_mut().find(|c| c.type_ == type_) {
        if existing.status != status_str {
            existing.last_transition_time = Time(Utc::now());
        }
        existing.status = status_str.to_string();
        existing.reason = Some(reason.to_string());
        existing.message = Some(message.to_string());
    } else {
        conditions.push(Condition {
            type_: type_.to_string(),
            status: status_str.to_string(),
            reason: Some(reason.to_string()),
            message: Some(message.to_string()),
            last_transition_time: Time(Utc::now()),
            observed_generation: None,
        });
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn inserts_new_condition() {
        let mut conditions = Vec::new();
        upsert_condition(&mut conditions, "Ready", true, "SubnetFound", "ok");
        assert_eq!(conditions.len(), 1);
        assert_eq!(conditions[0].status, "True");
    }

    #[test]
    fn updates_existing_condition_in_place() {
        let mut conditions = Vec::new();
        upsert_condition(&mut conditions, "Ready", true, "SubnetFound", "ok");
        let first_transition = conditions[0].last_transition_time.clone();
        upsert_condition(&mut conditions, "Ready", true, "SubnetFound", "still ok");
        assert_eq!(conditions.len(), 1);
        assert_eq!(conditions[0].last_transition_time, first_transition);

        upsert_condition(&mut conditions, "Ready", false, "SubnetNotFound", "gone");
        assert_eq!(conditions[0].status, "False");
    }
}
