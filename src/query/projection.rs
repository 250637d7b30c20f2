use bson::{Bson, Document};

/// Value mapped to excluded projection fields.
pub const EXCLUDE: i32 = 0;
/// Value mapped to descending sort fields.
pub const DESCENDING: i32 = -1;

/// Maps field names to `1`, or to `exclusion` when prefixed with `-`.
///
/// e.g. `["a", "-b"]` with `0` => `{a: 1, b: 0}`
#[must_use]
pub fn build_field_map(names: Option<&[String]>, exclusion: i32) -> Document {
    let mut out = Document::new();
    for name in names.unwrap_or_default() {
        match name.strip_prefix('-') {
            Some(field) => out.insert(field, Bson::Int32(exclusion)),
            None => out.insert(name.as_str(), Bson::Int32(1)),
        };
    }
    out
}

#[must_use]
pub fn build_projection(select: Option<&[String]>) -> Document {
    build_field_map(select, EXCLUDE)
}

#[must_use]
pub fn build_sort(sort: Option<&[String]>) -> Document {
    build_field_map(sort, DESCENDING)
}
