//! One normalizer per `RawRecord` variant.
//!
//! Missing fields become `None`; a field that is present but unusable (wrong
//! JSON type, blank string) also becomes `None` and marks the record repaired.
//! Normalization never fails.

use serde_json::{Map, Value};

use crate::capability::{RawRecord, Record};

#[derive(Debug, Clone, PartialEq)]
pub struct Normalized {
    pub record: Record,
    pub repaired: bool,
}

pub fn normalize(raw: RawRecord) -> Normalized {
    match raw {
        RawRecord::Structured(r) => normalize_structured(r),
        RawRecord::Identifier(id) => normalize_identifier(id),
        RawRecord::Partial(map) => normalize_partial(map),
    }
}

/// Trim a string slot; blank strings are dropped and counted as repairs.
fn clean(slot: Option<String>, repaired: &mut bool) -> Option<String> {
    let s = slot?;
    let t = s.trim();
    if t.is_empty() {
        *repaired = true;
        return None;
    }
    Some(t.to_string())
}

fn normalize_structured(r: Record) -> Normalized {
    let mut repaired = false;
    let record = Record {
        name: clean(r.name, &mut repaired),
        external_id: clean(r.external_id, &mut repaired),
        source_url: clean(r.source_url, &mut repaired),
        kind: clean(r.kind, &mut repaired),
        observed_at: clean(r.observed_at, &mut repaired),
        attributes: r.attributes.filter(|a| !a.is_empty()),
    };
    Normalized { record, repaired }
}

fn normalize_identifier(id: String) -> Normalized {
    let mut repaired = false;
    Normalized {
        record: Record {
            name: clean(Some(id), &mut repaired),
            ..Record::default()
        },
        repaired,
    }
}

/// Take the first present key among `keys`; strings and numbers are accepted.
fn take_field(map: &mut Map<String, Value>, keys: &[&str], repaired: &mut bool) -> Option<String> {
    let mut found = None;
    for key in keys {
        if let Some(v) = map.remove(*key) {
            if found.is_none() {
                found = Some(v);
            }
        }
    }
    match found? {
        Value::String(s) => clean(Some(s), repaired),
        Value::Number(n) => Some(n.to_string()),
        Value::Null => None,
        _ => {
            *repaired = true;
            None
        }
    }
}

fn normalize_partial(mut map: Map<String, Value>) -> Normalized {
    let mut repaired = false;
    let name = take_field(&mut map, &["name", "title"], &mut repaired);
    let external_id = take_field(&mut map, &["external_id", "id"], &mut repaired);
    let source_url = take_field(&mut map, &["source_url", "url"], &mut repaired);
    let kind = take_field(&mut map, &["kind", "type"], &mut repaired);
    let observed_at = take_field(&mut map, &["observed_at", "date"], &mut repaired);
    let attributes = match map.remove("attributes") {
        Some(Value::Object(attrs)) => {
            let mut attrs = attrs;
            attrs.extend(map);
            Some(attrs)
        }
        Some(_) => {
            repaired = true;
            Some(map)
        }
        None => Some(map),
    }
    .filter(|a| !a.is_empty());
    Normalized {
        record: Record {
            name,
            external_id,
            source_url,
            kind,
            observed_at,
            attributes,
        },
        repaired,
    }
}
