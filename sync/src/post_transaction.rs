use chain::TransactionId;
use std::fmt;

/// Outcome of posting a transaction to the node.
#[derive(Debug, Clone, PartialEq)]
pub enum PostTransactionStatus {
    Success,
    /// Transaction already exists, pending, executed or confirmed.
    Duplicated,
    /// The pool is full; the caller may retry later.
    ReachedPendingLimit,
    SignatureError,
    SerializerError,
    /// Declared block id is outside the allowed window.
    Outdated,
    ValidationError,
    Timeout,
    /// This node is too far behind the expected chain tip.
    Desynchronized,
}

#[derive(Debug, Clone, PartialEq)]
pub struct PostTransactionResult {
    pub transaction_id: Option<TransactionId>,
    pub status: PostTransactionStatus,
    pub details: String,
}

pub type PostTransactionCallback = Box<dyn FnOnce(PostTransactionResult) + Send>;

impl PostTransactionResult {
    pub fn new(transaction_id: TransactionId, status: PostTransactionStatus) -> Self {
        PostTransactionResult {
            transaction_id: Some(transaction_id),
            status: status,
            details: String::new(),
        }
    }

    pub fn with_details<T: Into<String>>(
        transaction_id: TransactionId,
        status: PostTransactionStatus,
        details: T,
    ) -> Self {
        PostTransactionResult {
            transaction_id: Some(transaction_id),
            status: status,
            details: details.into(),
        }
    }

    pub fn without_id(status: PostTransactionStatus) -> Self {
        PostTransactionResult {
            transaction_id: None,
            status: status,
            details: String::new(),
        }
    }

    pub fn is_success(&self) -> bool {
        self.status == PostTransactionStatus::Success
    }
}

impl fmt::Display for PostTransactionResult {
    fn fmt(&self, f: &mut fmt::Formatter) -> fmt::Result {
        write!(f, "{:?}", self.status)?;
        if !self.details.is_empty() {
            write!(f, " - {}", self.details)?;
        }
        Ok(())
    }
}
