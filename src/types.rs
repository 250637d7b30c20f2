use bson::Bson;
use bson::oid::ObjectId;

pub type CollectionName = String;

/// Primary identifier field of every stored document.
pub const ID_FIELD: &str = "_id";

/// Resource label used in replies when the envelope names no collection.
pub const DEFAULT_RESOURCE: &str = "data";

/// Converts a portable identifier into the store's native form.
///
/// 24-character hex strings become `ObjectId`s; anything else is passed through unchanged so
/// collections keyed by plain strings or integers still match.
#[must_use]
pub fn to_native_id(id: &Bson) -> Bson {
    match id {
        Bson::String(s) => ObjectId::parse_str(s).map_or_else(|_| id.clone(), Bson::ObjectId),
        other => other.clone(),
    }
}

/// Converts a native identifier into its portable string form.
///
/// Every scalar kind is rendered as a string. Composite identifiers (documents, arrays, binary)
/// and null have no portable text form and are passed through.
#[must_use]
pub fn to_portable_id(id: &Bson) -> Bson {
    let text = match id {
        Bson::ObjectId(oid) => oid.to_hex(),
        Bson::Int32(i) => i.to_string(),
        Bson::Int64(i) => i.to_string(),
        Bson::Double(f) => f.to_string(),
        Bson::Decimal128(d) => d.to_string(),
        Bson::Boolean(b) => b.to_string(),
        Bson::DateTime(dt) => dt.try_to_rfc3339_string().unwrap_or_else(|_| dt.timestamp_millis().to_string()),
        Bson::Symbol(s) => s.clone(),
        other => return other.clone(),
    };
    Bson::String(text)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn hex_strings_become_object_ids() {
        let oid = ObjectId::new();
        let native = to_native_id(&Bson::String(oid.to_hex()));
        assert_eq!(native, Bson::ObjectId(oid));
        assert_eq!(to_portable_id(&native), Bson::String(oid.to_hex()));
    }

    #[test]
    fn non_hex_identifiers_pass_through() {
        assert_eq!(to_native_id(&Bson::String("pk-1".into())), Bson::String("pk-1".into()));
        assert_eq!(to_native_id(&Bson::Int32(3)), Bson::Int32(3));
        assert_eq!(to_portable_id(&Bson::Int64(7)), Bson::String("7".into()));
    }

    #[test]
    fn every_scalar_id_becomes_a_string() {
        assert_eq!(to_portable_id(&Bson::Double(2.5)), Bson::String("2.5".into()));
        assert_eq!(to_portable_id(&Bson::Boolean(true)), Bson::String("true".into()));
        let dt = bson::DateTime::from_millis(0);
        assert_eq!(to_portable_id(&dt.into()), Bson::String("1970-01-01T00:00:00Z".into()));
        let dec: bson::Decimal128 = "12.50".parse().unwrap();
        assert!(matches!(to_portable_id(&Bson::Decimal128(dec)), Bson::String(s) if s.starts_with("12")));
        assert_eq!(to_portable_id(&Bson::String("pk-1".into())), Bson::String("pk-1".into()));
        assert_eq!(to_portable_id(&Bson::Null), Bson::Null);
    }
}
