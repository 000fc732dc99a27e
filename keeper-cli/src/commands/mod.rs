pub mod history;
pub mod ledger;
pub mod scheme;
pub mod status;
pub mod supervise;
