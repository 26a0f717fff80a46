pub mod claim;
pub mod exchange;
pub mod referral;
pub mod tasks;
