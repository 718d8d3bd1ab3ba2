// Autorec rule engine module
pub mod dvr;

// Program guide types and directory interfaces
pub mod epg;

pub use dvr::autorec::{AutorecEngine, AutorecError, AutorecRule, Collaborators, RuleId};
pub use dvr::models::AutorecRecord;
pub use dvr::{init_logging, DvrState};
