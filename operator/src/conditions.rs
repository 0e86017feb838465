use kcp_operator_api as api;
use api::{BundleState, Condition, KubeconfigPhase, WorkloadPhase};

/*
 * Inserts or refreshes the condition of the same type.
 *
 * The transition time only moves when the status actually flips; reason,
 * message and observed generation are always refreshed.
 */
pub fn update(conditions: &mut Vec<Condition>, new: Condition) {
    match conditions.iter_mut().find(|c| c.type_ == new.type_) {
	None => conditions.push(new),
	Some(existing) => {
	    if existing.status != new.status {
		existing.status = new.status;
		existing.last_transition_time = new.last_transition_time;
	    }
	    existing.reason = new.reason;
	    existing.message = new.message;
	    existing.observed_generation = new.observed_generation;
	}
    }
}

pub fn find<'a>(conditions: &'a [Condition], type_: &str) -> Option<&'a Condition> {
    conditions.iter().find(|c| c.type_ == type_)
}

pub fn is_true(conditions: &[Condition], type_: &str) -> bool {
    find(conditions, type_).map(|c| c.is_true()).unwrap_or(false)
}

pub fn remove(conditions: &mut Vec<Condition>, type_: &str) {
    conditions.retain(|c| c.type_ != type_);
}

/*
 * Phase of a RootShard, Shard or FrontProxy, in priority order:
 *
 *   Available=True          -> Running
 *   being deleted           -> Deleting
 *   Bundle=True             -> Bundled
 *   Bundle present, not True-> Provisioning
 *   otherwise               -> prior phase, or Provisioning
 */
pub fn workload_phase(conditions: &[Condition], deleting: bool, prior: Option<WorkloadPhase>) -> WorkloadPhase {
    if is_true(conditions, api::CONDITION_AVAILABLE) {
	return WorkloadPhase::Running;
    }
    if deleting {
	return WorkloadPhase::Deleting;
    }
    match find(conditions, api::CONDITION_BUNDLE) {
	Some(bundle) if bundle.is_true() => WorkloadPhase::Bundled,
	Some(_) => WorkloadPhase::Provisioning,
	None => prior.unwrap_or(WorkloadPhase::Provisioning),
    }
}

pub fn kubeconfig_phase(conditions: &[Condition], deleting: bool) -> KubeconfigPhase {
    if deleting {
	KubeconfigPhase::Deleting
    } else if is_true(conditions, api::CONDITION_READY) {
	KubeconfigPhase::Ready
    } else {
	KubeconfigPhase::Provisioning
    }
}

pub fn bundle_state(all_ready: bool, deleting: bool) -> BundleState {
    if deleting {
	BundleState::Deleting
    } else if all_ready {
	BundleState::Ready
    } else {
	BundleState::Provisioning
    }
}

/*
 * Status writes trigger a new watch event on the resource itself, so they
 * are skipped entirely when nothing changed.
 */
pub fn status_changed<T: PartialEq>(old: Option<&T>, new: &T) -> bool {
    match old {
	Some(old) => old != new,
	None => true,
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use api::ConditionStatus;
    use chrono::{Duration, Utc};

    fn condition_at(type_: &str, status: ConditionStatus, reason: &str, age_secs: i64) -> Condition {
	let mut cond = Condition::new(type_, status, reason, "");
	cond.last_transition_time = Utc::now() - Duration::seconds(age_secs);
	cond
    }

    #[test]
    fn appends_unknown_types() {
	let mut conditions = vec![];
	update(&mut conditions, condition_at("Available", ConditionStatus::False, "Pending", 0));
	update(&mut conditions, condition_at("ReferenceValid", ConditionStatus::True, "Valid", 0));

	assert_eq!(conditions.len(), 2);
	assert_eq!(conditions[0].type_, "Available");
	assert_eq!(conditions[1].type_, "ReferenceValid");
    }

    #[test]
    fn same_status_keeps_transition_time() {
	let mut conditions = vec![];
	let first = condition_at("Ready", ConditionStatus::False, "Waiting", 60);
	let original_time = first.last_transition_time;
	update(&mut conditions, first);

	let mut second = condition_at("Ready", ConditionStatus::False, "StillWaiting", 0);
	second.message = "2 of 5 objects are not ready".into();
	second.observed_generation = Some(4);
	update(&mut conditions, second);

	assert_eq!(conditions.len(), 1);
	assert_eq!(conditions[0].last_transition_time, original_time);
	assert_eq!(conditions[0].reason, "StillWaiting");
	assert_eq!(conditions[0].message, "2 of 5 objects are not ready");
	assert_eq!(conditions[0].observed_generation, Some(4));
    }

    #[test]
    fn applying_identical_condition_twice_is_stable() {
	let mut conditions = vec![];
	update(&mut conditions, condition_at("Ready", ConditionStatus::True, "Ok", 30));
	let snapshot = conditions.clone();

	update(&mut conditions, condition_at("Ready", ConditionStatus::True, "Ok", 0));
	assert_eq!(conditions, snapshot);
    }

    #[test]
    fn flipping_status_moves_transition_time() {
	let mut conditions = vec![];
	update(&mut conditions, condition_at("Ready", ConditionStatus::False, "Waiting", 60));
	let before = conditions[0].last_transition_time;

	update(&mut conditions, condition_at("Ready", ConditionStatus::True, "Done", 0));
	assert!(conditions[0].last_transition_time > before);
	assert_eq!(conditions[0].status, ConditionStatus::True);
    }

    #[test]
    fn workload_phase_priority() {
	let available = condition_at(api::CONDITION_AVAILABLE, ConditionStatus::True, "", 0);
	let unavailable = condition_at(api::CONDITION_AVAILABLE, ConditionStatus::False, "", 0);
	let bundled = condition_at(api::CONDITION_BUNDLE, ConditionStatus::True, "", 0);
	let bundling = condition_at(api::CONDITION_BUNDLE, ConditionStatus::False, "", 0);

	assert_eq!(workload_phase(&[available.clone()], true, None), WorkloadPhase::Running);
	assert_eq!(workload_phase(&[unavailable.clone()], true, None), WorkloadPhase::Deleting);
	assert_eq!(workload_phase(&[unavailable.clone(), bundled], false, None), WorkloadPhase::Bundled);
	assert_eq!(workload_phase(&[unavailable.clone(), bundling], false, Some(WorkloadPhase::Running)), WorkloadPhase::Provisioning);
	assert_eq!(workload_phase(&[unavailable.clone()], false, Some(WorkloadPhase::Running)), WorkloadPhase::Running);
	assert_eq!(workload_phase(&[], false, None), WorkloadPhase::Provisioning);
    }

    #[test]
    fn kubeconfig_and_bundle_phases() {
	let ready = condition_at(api::CONDITION_READY, ConditionStatus::True, "", 0);
	assert_eq!(kubeconfig_phase(&[ready.clone()], false), KubeconfigPhase::Ready);
	assert_eq!(kubeconfig_phase(&[ready], true), KubeconfigPhase::Deleting);
	assert_eq!(kubeconfig_phase(&[], false), KubeconfigPhase::Provisioning);

	assert_eq!(bundle_state(true, false), BundleState::Ready);
	assert_eq!(bundle_state(false, false), BundleState::Provisioning);
	assert_eq!(bundle_state(true, true), BundleState::Deleting);
    }

    #[test]
    fn unchanged_status_is_not_written() {
	let status = api::WorkloadStatus::default();
	assert!(!status_changed(Some(&status), &status));
	assert!(status_changed(None, &status));
    }
}
