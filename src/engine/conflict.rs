use chrono::NaiveDate;
use ulid::Ulid;

use crate::limits::*;
use crate::model::*;

use super::EngineError;

/// A requested slot after its handle has been resolved.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub(super) struct Target {
    pub key: SlotKey,
    /// Existing row, if any, and whether it was reserved when read.
    pub row: Option<(Ulid, bool)>,
}

pub(super) fn check_batch_size(len: usize) -> Result<(), EngineError> {
    if len == 0 {
        return Err(EngineError::Validation("no slots requested".into()));
    }
    if len > MAX_SLOTS_PER_REQUEST {
        return Err(EngineError::LimitExceeded("too many slots in one request"));
    }
    Ok(())
}

pub(super) fn check_owner(key: &SlotKey, resource_id: Ulid, date: NaiveDate) -> Result<(), EngineError> {
    if key.resource_id != resource_id {
        return Err(EngineError::Consistency(format!(
            "slot {key} belongs to another resource"
        )));
    }
    if key.date != date {
        return Err(EngineError::Consistency(format!("slot {key} is on another date")));
    }
    Ok(())
}

/// Sort by start and require each slot to end where the next begins.
/// Duplicates, gaps, and overlaps all fail.
pub(super) fn sort_contiguous<T>(items: &mut [T], range: impl Fn(&T) -> SlotRange) -> Result<(), EngineError> {
    items.sort_by_key(|item| range(item));
    for pair in items.windows(2) {
        let (a, b) = (range(&pair[0]), range(&pair[1]));
        if a.end != b.start {
            return Err(EngineError::Consistency(format!(
                "slots {a} and {b} are not contiguous"
            )));
        }
    }
    Ok(())
}

/// Non-mutating check that nothing in the batch is closed or already held.
pub(super) fn check_available(resource: &Resource, targets: &[Target]) -> Result<(), EngineError> {
    for target in targets {
        if resource.overrides.is_closed(target.key.date, &target.key.range) {
            return Err(EngineError::Conflict(target.key));
        }
        if let Some((_, true)) = target.row {
            return Err(EngineError::Conflict(target.key));
        }
    }
    Ok(())
}

fn check_field(field: &'static str, value: &str) -> Result<(), EngineError> {
    if value.trim().is_empty() {
        return Err(EngineError::Validation(format!("{field} is required")));
    }
    if value.len() > MAX_CUSTOMER_FIELD_LEN {
        return Err(EngineError::LimitExceeded("customer field too long"));
    }
    Ok(())
}

pub fn validate_customer(customer: &Customer) -> Result<(), EngineError> {
    check_field("name", &customer.name)?;
    check_field("email", &customer.email)?;
    match customer.email.split_once('@') {
        Some((local, domain)) if !local.is_empty() && !domain.is_empty() => {}
        _ => {
            return Err(EngineError::Validation(format!(
                "invalid email address: {:?}",
                customer.email
            )));
        }
    }
    if let Some(phone) = &customer.phone
        && phone.len() > MAX_CUSTOMER_FIELD_LEN
    {
        return Err(EngineError::LimitExceeded("customer field too long"));
    }
    Ok(())
}
