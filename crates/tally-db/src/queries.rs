//! Database query functions organized by domain.

pub mod balances;
pub mod claims;
pub mod invitations;
pub mod leases;
pub mod milestones;
pub mod redemption_codes;
pub mod settings;
pub mod transactions;
