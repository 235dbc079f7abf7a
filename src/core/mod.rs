//! Core fund logic and the abstractions it is built against

pub mod access;
pub mod amount;
pub mod asset;
pub mod clock;
pub mod config;
pub mod error;
pub mod fund;
pub mod ledger;
pub mod log;
pub mod price;
pub mod rebalance;
pub mod swap;
pub mod valuation;

// Re-export main types for cleaner imports
pub use access::{AccessPolicy, Role, RoleRegistry};
pub use asset::{Account, Asset};
pub use clock::{Clock, ManualClock, SystemClock};
pub use error::{FundError, FundResult};
pub use fund::{Fund, FundConfig, FundServices};
pub use ledger::{Constituent, Withdrawal};
pub use price::{FeedRate, PriceFeed, PriceGraph};
pub use rebalance::{FeeCharge, FundStatus};
pub use swap::{Fill, SwapAdapter, SwapOrder};
