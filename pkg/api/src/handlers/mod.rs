pub mod ledger;
pub mod nodes;
pub mod quotas;
pub mod subnamespaces;
pub mod tenants;
pub mod watch;
