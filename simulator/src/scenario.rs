//! Simulation scenarios.

use serde::{Deserialize, Serialize};
use simplebank_common::Currency;
use simplebank_ledger::{FaultKind, FaultPoint};

/// A simulation scenario.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Scenario {
    /// Scenario name.
    pub name: String,
    /// Description.
    pub description: String,
    /// Steps in the scenario.
    pub steps: Vec<ScenarioStep>,
}

/// A step in a scenario.
///
/// Accounts are referred to by the name they were opened under.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub enum ScenarioStep {
    /// Open an account.
    OpenAccount {
        name: String,
        currency: Currency,
        balance: i64,
    },
    /// Execute one transfer.
    Transfer {
        from: String,
        to: String,
        amount: i64,
        expect: Outcome,
    },
    /// Execute `count` concurrent transfers in one direction.
    Burst {
        from: String,
        to: String,
        amount: i64,
        count: usize,
    },
    /// Execute `rounds` concurrent transfer pairs in both directions.
    Contention {
        a: String,
        b: String,
        amount: i64,
        rounds: usize,
    },
    /// Wait for a duration.
    Wait { millis: u64 },
    /// Fail the next storage call at `point`.
    InjectFault { point: FaultPoint, kind: FaultKind },
    /// Drop pending faults.
    ClearFaults,
    /// Assert a condition.
    Assert { condition: AssertCondition },
}

/// Expected result of a single transfer.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum Outcome {
    Committed,
    Failed,
}

/// Conditions that can be asserted.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub enum AssertCondition {
    /// Account balance equals.
    BalanceEquals { account: String, amount: i64 },
    /// Every balance equals the sum of its entries.
    LedgerConsistent,
    /// Number of transfers touching an account.
    TransferCount { account: String, count: usize },
}

impl Scenario {
    /// Names accepted by [`Scenario::load`].
    pub const NAMES: [&'static str; 3] = ["transfer-pair", "bidirectional", "fault-recovery"];

    /// Load a scenario by name.
    pub fn load(name: &str) -> anyhow::Result<Self> {
        match name {
            "transfer-pair" => Ok(Self::transfer_pair()),
            "bidirectional" => Ok(Self::bidirectional()),
            "fault-recovery" => Ok(Self::fault_recovery()),
            _ => Err(anyhow::anyhow!(
                "Unknown scenario: {} (expected one of {})",
                name,
                Self::NAMES.join(", ")
            )),
        }
    }

    fn open(name: &str, balance: i64) -> ScenarioStep {
        ScenarioStep::OpenAccount {
            name: name.to_string(),
            currency: Currency::Usd,
            balance,
        }
    }

    fn transfer(from: &str, to: &str, amount: i64, expect: Outcome) -> ScenarioStep {
        ScenarioStep::Transfer {
            from: from.to_string(),
            to: to.to_string(),
            amount,
            expect,
        }
    }

    fn balance(account: &str, amount: i64) -> ScenarioStep {
        ScenarioStep::Assert {
            condition: AssertCondition::BalanceEquals {
                account: account.to_string(),
                amount,
            },
        }
    }

    fn consistent() -> ScenarioStep {
        ScenarioStep::Assert {
            condition: AssertCondition::LedgerConsistent,
        }
    }

    /// Two accounts, one ordinary transfer and one overdraft.
    fn transfer_pair() -> Self {
        Self {
            name: "transfer-pair".to_string(),
            description: "A=100, B=50; move 30 then 1000 from A to B".to_string(),
            steps: vec![
                Self::open("A", 100),
                Self::open("B", 50),
                Self::transfer("A", "B", 30, Outcome::Committed),
                Self::balance("A", 70),
                Self::balance("B", 80),
                Self::transfer("A", "B", 1000, Outcome::Committed),
                Self::balance("A", -930),
                Self::balance("B", 1080),
                Self::consistent(),
            ],
        }
    }

    /// Opposing concurrent transfers between the same two accounts.
    fn bidirectional() -> Self {
        Self {
            name: "bidirectional".to_string(),
            description: "Concurrent X->Y and Y->X transfers must neither deadlock nor lose updates"
                .to_string(),
            steps: vec![
                Self::open("X", 10_000),
                Self::open("Y", 10_000),
                ScenarioStep::Burst {
                    from: "X".to_string(),
                    to: "Y".to_string(),
                    amount: 7,
                    count: 20,
                },
                ScenarioStep::Burst {
                    from: "Y".to_string(),
                    to: "X".to_string(),
                    amount: 7,
                    count: 20,
                },
                Self::balance("X", 10_000),
                Self::balance("Y", 10_000),
                ScenarioStep::Contention {
                    a: "X".to_string(),
                    b: "Y".to_string(),
                    amount: 3,
                    rounds: 50,
                },
                Self::consistent(),
            ],
        }
    }

    /// Storage failures leave nothing behind; conflicts are retried once.
    fn fault_recovery() -> Self {
        Self {
            name: "fault-recovery".to_string(),
            description: "Injected storage faults roll back; injected conflicts are retried"
                .to_string(),
            steps: vec![
                Self::open("A", 100),
                Self::open("B", 50),
                ScenarioStep::InjectFault {
                    point: FaultPoint::AddBalance,
                    kind: FaultKind::Storage,
                },
                Self::transfer("A", "B", 30, Outcome::Failed),
                Self::balance("A", 100),
                Self::balance("B", 50),
                ScenarioStep::Assert {
                    condition: AssertCondition::TransferCount {
                        account: "A".to_string(),
                        count: 0,
                    },
                },
                ScenarioStep::InjectFault {
                    point: FaultPoint::Commit,
                    kind: FaultKind::Conflict,
                },
                Self::transfer("A", "B", 30, Outcome::Committed),
                ScenarioStep::Assert {
                    condition: AssertCondition::TransferCount {
                        account: "A".to_string(),
                        count: 1,
                    },
                },
                Self::balance("A", 70),
                Self::balance("B", 80),
                ScenarioStep::ClearFaults,
                Self::consistent(),
            ],
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_load_known_scenarios() {
        for name in Scenario::NAMES {
            let scenario = Scenario::load(name).unwrap();
            assert_eq!(scenario.name, name);
            assert!(!scenario.steps.is_empty());
        }
        assert!(Scenario::load("multi-currency").is_err());
    }

    #[test]
    fn test_scenario_serializes() {
        let scenario = Scenario::load("fault-recovery").unwrap();
        let json = serde_json::to_string(&scenario).unwrap();
        assert!(json.contains("\"AddBalance\""));
        let back: Scenario = serde_json::from_str(&json).unwrap();
        assert_eq!(back.steps.len(), scenario.steps.len());
    }
}
