use crate::core::config::ConfigError;
use crate::core::errors::ExchangeError;
use crate::core::types::OrderState;
use std::collections::HashMap;

/// Exchange status string → canonical [`OrderState`], validated when built.
#[derive(Debug, Clone)]
pub struct StatusTable {
    exchange: &'static str,
    states: HashMap<&'static str, OrderState>,
}

impl StatusTable {
    /// Build the table, requiring every status in `known_statuses` to be mapped
    /// and rejecting keys mapped to two different states.
    pub fn validated(
        exchange: &'static str,
        entries: &[(&'static str, OrderState)],
        known_statuses: &[&'static str],
    ) -> Result<Self, ConfigError> {
        let mut states = HashMap::with_capacity(entries.len());
        for (status, state) in entries {
            if let Some(previous) = states.insert(*status, *state) {
                if previous != *state {
                    return Err(ConfigError::InvalidConfiguration(format!(
                        "{exchange}: status '{status}' mapped to both {previous} and {state}"
                    )));
                }
            }
        }

        if let Some(missing) = known_statuses.iter().find(|s| !states.contains_key(*s)) {
            return Err(ConfigError::UnmappedStatus {
                status: format!("{exchange}:{missing}"),
            });
        }

        Ok(Self { exchange, states })
    }

    pub fn lookup(&self, status: &str) -> Result<OrderState, ExchangeError> {
        self.states.get(status).copied().ok_or_else(|| {
            ExchangeError::MalformedMessage(format!(
                "{}: unexpected order status '{}'",
                self.exchange, status
            ))
        })
    }

    pub fn len(&self) -> usize {
        self.states.len()
    }

    pub fn is_empty(&self) -> bool {
        self.states.is_empty()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    const ENTRIES: &[(&str, OrderState)] = &[
        ("NEW", OrderState::Open),
        ("FILLED", OrderState::Filled),
        ("CANCELED", OrderState::Canceled),
    ];

    #[test]
    fn test_lookup_known_status() {
        let table = StatusTable::validated("demo", ENTRIES, &["NEW", "FILLED"]).unwrap();
        assert_eq!(table.lookup("NEW").unwrap(), OrderState::Open);
        assert!(matches!(
            table.lookup("MYSTERY"),
            Err(ExchangeError::MalformedMessage(_))
        ));
    }

    #[test]
    fn test_unmapped_known_status_is_config_error() {
        let err = StatusTable::validated("demo", ENTRIES, &["NEW", "EXPIRED"]).unwrap_err();
        assert!(matches!(err, ConfigError::UnmappedStatus { .. }));
    }

    #[test]
    fn test_conflicting_duplicate_rejected() {
        let entries = [("NEW", OrderState::Open), ("NEW", OrderState::Failed)];
        assert!(StatusTable::validated("demo", &entries, &[]).is_err());
    }
}
