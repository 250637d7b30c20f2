// Envelope model and the builders that turn it into native query fragments
mod parse;
mod projection;
mod reply;
mod selector;
mod types;
mod update;

pub use parse::parse_envelope_json;
pub use projection::{DESCENDING, EXCLUDE, build_field_map, build_projection, build_sort};
pub use reply::{Reply, ReplyData};
pub use selector::{build_selector, id_selector, map_operators};
pub use types::{
    AND_NATIVE, MatchNode, MatchOp, OR_NATIVE, PopulateDirective, QueryEnvelope, UpdateDirective,
    UpdateOp, Verb,
};
pub use update::{build_update, is_multi};

/// Native update operator spellings.
pub mod ops {
    pub use super::update::{EACH, INC, PULL, PULL_ALL, PUSH, RENAME, SET, UNSET};
}
