// =============================================================================
// Shared types used across the WallTrack engine
// =============================================================================

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

/// Wrapped-SOL mint address. The SOL leg of every swap quotes against this.
pub const WSOL_MINT: &str = "So11111111111111111111111111111111111111112";

/// Direction of a swap as seen from the mirrored wallet.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Direction {
    Buy,
    Sell,
}

impl std::fmt::Display for Direction {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::Buy => write!(f, "buy"),
            Self::Sell => write!(f, "sell"),
        }
    }
}

/// Whether positions run against real funds or are filled synthetically.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum TradeMode {
    Simulation,
    Live,
}

impl Default for TradeMode {
    fn default() -> Self {
        Self::Simulation
    }
}

impl std::fmt::Display for TradeMode {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::Simulation => write!(f, "simulation"),
            Self::Live => write!(f, "live"),
        }
    }
}

/// Execution priority of a queued swap intent. Lower value = more urgent.
///
/// Capital protection dominates: mirror exits preempt stop exits, which
/// preempt entries, which preempt scaling-out.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(rename_all = "UPPERCASE")]
pub enum Priority {
    Critical = 1,
    Urgent = 2,
    Normal = 3,
    Low = 4,
}

impl std::fmt::Display for Priority {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::Critical => write!(f, "CRITICAL"),
            Self::Urgent => write!(f, "URGENT"),
            Self::Normal => write!(f, "NORMAL"),
            Self::Low => write!(f, "LOW"),
        }
    }
}

/// What an order is for. Exit kinds carry the rule that fired them.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum OrderKind {
    Entry,
    ExitStopLoss,
    ExitTrailing,
    ExitScaling,
    ExitMirror,
    ExitManual,
}

impl OrderKind {
    /// Queue priority mandated for this kind of order.
    pub fn priority(self) -> Priority {
        match self {
            Self::ExitMirror => Priority::Critical,
            Self::ExitStopLoss | Self::ExitTrailing | Self::ExitManual => Priority::Urgent,
            Self::Entry => Priority::Normal,
            Self::ExitScaling => Priority::Low,
        }
    }

    pub fn is_exit(self) -> bool {
        !matches!(self, Self::Entry)
    }
}

impl std::fmt::Display for OrderKind {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::Entry => write!(f, "entry"),
            Self::ExitStopLoss => write!(f, "exit_stop_loss"),
            Self::ExitTrailing => write!(f, "exit_trailing"),
            Self::ExitScaling => write!(f, "exit_scaling"),
            Self::ExitMirror => write!(f, "exit_mirror"),
            Self::ExitManual => write!(f, "exit_manual"),
        }
    }
}

/// Lifecycle status of an order record.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum OrderStatus {
    Pending,
    Submitted,
    Executed,
    Failed,
    Cancelled,
}

impl OrderStatus {
    pub fn is_terminal(self) -> bool {
        matches!(self, Self::Executed | Self::Failed | Self::Cancelled)
    }
}

impl std::fmt::Display for OrderStatus {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::Pending => write!(f, "pending"),
            Self::Submitted => write!(f, "submitted"),
            Self::Executed => write!(f, "executed"),
            Self::Failed => write!(f, "failed"),
            Self::Cancelled => write!(f, "cancelled"),
        }
    }
}

/// A normalised swap observed on-chain from a watched wallet.
///
/// `tx_signature` is the idempotency key end to end: the event log, the
/// pipeline, and live orders all dedupe on it.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SwapEvent {
    pub tx_signature: String,
    /// Fee payer of the transaction — the wallet being mirrored.
    pub wallet: String,
    /// Mint address of the non-SOL leg.
    pub token: String,
    pub direction: Direction,
    /// Token amount in UI units (decimals applied).
    pub amount_token: f64,
    /// SOL spent (buy) or received (sell).
    pub amount_sol: f64,
    pub slot: u64,
    pub ts: DateTime<Utc>,
}

/// Conviction tier derived from the final score.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ConvictionTier {
    None,
    Standard,
    High,
}

impl ConvictionTier {
    /// Position size multiplier attached to the tier.
    pub fn multiplier(self) -> f64 {
        match self {
            Self::None => 0.0,
            Self::Standard => 1.0,
            Self::High => 1.5,
        }
    }
}

impl std::fmt::Display for ConvictionTier {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::None => write!(f, "none"),
            Self::Standard => write!(f, "standard"),
            Self::High => write!(f, "high"),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn priority_total_order() {
        assert!(Priority::Critical < Priority::Urgent);
        assert!(Priority::Urgent < Priority::Normal);
        assert!(Priority::Normal < Priority::Low);
    }

    #[test]
    fn order_kind_priorities() {
        assert_eq!(OrderKind::ExitMirror.priority(), Priority::Critical);
        assert_eq!(OrderKind::ExitStopLoss.priority(), Priority::Urgent);
        assert_eq!(OrderKind::ExitTrailing.priority(), Priority::Urgent);
        assert_eq!(OrderKind::Entry.priority(), Priority::Normal);
        assert_eq!(OrderKind::ExitScaling.priority(), Priority::Low);
    }

    #[test]
    fn tier_multipliers() {
        assert_eq!(ConvictionTier::None.multiplier(), 0.0);
        assert_eq!(ConvictionTier::Standard.multiplier(), 1.0);
        assert_eq!(ConvictionTier::High.multiplier(), 1.5);
    }

    #[test]
    fn direction_serde_lowercase() {
        assert_eq!(serde_json::to_string(&Direction::Buy).unwrap(), "\"buy\"");
        let d: Direction = serde_json::from_str("\"sell\"").unwrap();
        assert_eq!(d, Direction::Sell);
    }
}
