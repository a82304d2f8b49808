//! Order signing, authentication and execution against the CLOB.

pub mod auth;
pub mod client;
pub mod eip712;
pub mod execution;
pub mod order;
pub mod paper;
pub mod wallet;

pub use auth::{ApiCredentials, ClobAuthError, L1Headers, L2Auth};
pub use client::{ClobClient, ClobError};
pub use eip712::{Address, Domain, Eip712Error, Side, SignatureType};
pub use execution::{ExecutionError, FillReport, OrderAck, OrderExecutor, OrderStatus};
pub use order::{OrderBuilder, OrderError, OrderRequest, OrderType, SignedOrder};
pub use paper::{PaperExecutor, PaperExecutorConfig};
pub use wallet::{Wallet, WalletError};
