//! Metric names and labels emitted through the `metrics` facade.

/// Label for the resource kind of a deduplicated operation.
pub const RESOURCE_KIND_LABEL: &str = "resource_kind";

/// Label for the reconciliation phase.
pub const PHASE_LABEL: &str = "phase";

/// Label for the classified error kind.
pub const ERROR_KIND_LABEL: &str = "error_kind";

/// Label for the outcome of a reconciliation pass.
pub const OUTCOME_LABEL: &str = "outcome";

// Single-flight metrics

/// Counter of calls that started a new execution.
pub const FOLLOWSYNC_SINGLE_FLIGHT_STARTED_TOTAL: &str = "followsync_single_flight_started_total";

/// Counter of calls that joined an in-flight execution.
pub const FOLLOWSYNC_SINGLE_FLIGHT_JOINED_TOTAL: &str = "followsync_single_flight_joined_total";

// Fan-out metrics

/// Gauge of fan-out items currently holding a permit.
pub const FOLLOWSYNC_FAN_OUT_ACTIVE_ITEMS: &str = "followsync_fan_out_active_items";

/// Counter of fan-out items that failed.
pub const FOLLOWSYNC_FAN_OUT_ITEM_FAILURES_TOTAL: &str = "followsync_fan_out_item_failures_total";

// Reconciliation metrics

/// Counter of executed reconciliation passes.
pub const FOLLOWSYNC_RECONCILIATIONS_TOTAL: &str = "followsync_reconciliations_total";

/// Counter of failed reconciliation phases.
pub const FOLLOWSYNC_PHASE_FAILURES_TOTAL: &str = "followsync_phase_failures_total";

/// Histogram of reconciliation pass durations in seconds.
pub const FOLLOWSYNC_RECONCILIATION_DURATION_SECONDS: &str =
    "followsync_reconciliation_duration_seconds";
