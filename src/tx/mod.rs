//! Transaction assembly, batch signing and submission

mod builder;
mod sender;
mod signer;

pub use builder::TransactionBuilder;
pub use sender::TransactionSender;
pub use signer::{BatchSigner, KeypairSigner, SignerError};
