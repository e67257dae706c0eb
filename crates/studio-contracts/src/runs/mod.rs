pub mod manifest;
pub mod receipts;
pub mod summary;
