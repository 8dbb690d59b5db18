//! The attribute-bag object model.
//!
//! # Design
//! An `Entity` is a class name plus a string-keyed bag of `Value`s and the set
//! of keys edited locally since the last sync. Local edits (`set`, `add`,
//! `increment`, ...) mark keys dirty; trusted bulk loads (construction,
//! `replace_attributes`, successful `save`/`fetch`) clear the dirty set.
//!
//! Incoming values tagged as `Pointer` or `Object` with a `className` are
//! hydrated into nested entities at the top level of the bag. Outbound
//! formatting strips the server-owned keys and turns nested entities back into
//! pointers, again one level deep.

use std::collections::{BTreeMap, BTreeSet};

use serde_json::{json, Map, Value as Json};
use tracing::{debug, warn};

use crate::http::HttpMethod;
use crate::transport::{join_path, Transport, CLASSES_PATH, STATUS_CREATED, STATUS_OK, USERS_PATH};
use crate::value::Value;

pub const OBJECT_ID: &str = "objectId";
pub const CREATED_AT: &str = "createdAt";
pub const UPDATED_AT: &str = "updatedAt";

/// Keys the server owns. Never sent outbound, stripped on reset.
pub const RESERVED_KEYS: [&str; 3] = [OBJECT_ID, CREATED_AT, UPDATED_AT];

/// Logical name of the built-in user collection.
pub const USER_KIND: &str = "User";

const ID_ALIAS: &str = "id";
const TYPE_TAG: &str = "__type";
const CLASS_NAME: &str = "className";

pub type Attributes = BTreeMap<String, Value>;

/// Which remote collection an entity belongs to.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub enum Kind {
    Class(String),
    User,
}

impl Kind {
    /// From a logical kind name (`"User"` selects the user collection).
    pub fn new(name: &str) -> Self {
        if name == USER_KIND {
            Kind::User
        } else {
            Kind::Class(name.to_string())
        }
    }

    /// From a wire class name, where the user collection is `_User`.
    pub fn from_class_name(class_name: &str) -> Self {
        match class_name.strip_prefix('_') {
            Some(USER_KIND) => Kind::User,
            _ => Kind::Class(class_name.to_string()),
        }
    }

    pub fn name(&self) -> &str {
        match self {
            Kind::Class(name) => name,
            Kind::User => USER_KIND,
        }
    }

    /// Wire class name.
    pub fn class_name(&self) -> String {
        match self {
            Kind::Class(name) => name.clone(),
            Kind::User => format!("_{USER_KIND}"),
        }
    }

    /// REST path of the collection, or of one object in it.
    pub fn path(&self, id: Option<&str>) -> String {
        let id = id.unwrap_or("");
        match self {
            Kind::Class(name) => join_path(&[CLASSES_PATH, name, id]),
            Kind::User => join_path(&[USERS_PATH, id]),
        }
    }
}

impl From<&str> for Kind {
    fn from(name: &str) -> Self {
        Kind::new(name)
    }
}

#[derive(Debug, Clone, PartialEq)]
pub struct Entity {
    kind: Kind,
    attributes: Attributes,
    dirty: BTreeSet<String>,
}

impl Entity {
    pub fn new(kind: impl Into<Kind>) -> Self {
        Self {
            kind: kind.into(),
            attributes: Attributes::new(),
            dirty: BTreeSet::new(),
        }
    }

    /// Build from trusted attributes; nothing starts dirty.
    pub fn with_attributes(kind: impl Into<Kind>, attributes: Attributes) -> Self {
        let mut entity = Self::new(kind);
        entity.attributes = attributes.into_iter().map(|(k, v)| (k, hydrate(v))).collect();
        entity
    }

    /// Build from a decoded server row.
    pub fn from_json(kind: impl Into<Kind>, row: Json) -> Self {
        Self::with_attributes(kind, json_attributes(row))
    }

    pub fn kind(&self) -> &Kind {
        &self.kind
    }

    pub fn class_name(&self) -> String {
        self.kind.class_name()
    }

    // -----------------------------------------------------------------------
    // Attribute access
    // -----------------------------------------------------------------------

    /// The value under `key`, treating empty-like values as absent.
    /// `id` reads `objectId`.
    pub fn get(&self, key: &str) -> Option<&Value> {
        self.attributes
            .get(canonical_key(key))
            .filter(|v| !v.is_empty_like())
    }

    /// Strict lookup: any stored value, including zero, false and empty.
    pub fn get_raw(&self, key: &str) -> Option<&Value> {
        self.attributes.get(canonical_key(key))
    }

    pub fn get_str(&self, key: &str) -> Option<&str> {
        self.get(key).and_then(Value::as_str)
    }

    pub fn has(&self, key: &str) -> bool {
        self.get(key).is_some()
    }

    /// Store a local edit. An empty key is ignored.
    pub fn set(&mut self, key: &str, value: impl Into<Value>) {
        if key.is_empty() {
            return;
        }
        let key = canonical_key(key).to_string();
        self.dirty.insert(key.clone());
        self.attributes.insert(key, hydrate(value.into()));
    }

    /// `set` every pair in `attributes`.
    pub fn set_all<K, V>(&mut self, attributes: impl IntoIterator<Item = (K, V)>)
    where
        K: AsRef<str>,
        V: Into<Value>,
    {
        for (key, value) in attributes {
            self.set(key.as_ref(), value);
        }
    }

    pub fn attributes(&self) -> &Attributes {
        &self.attributes
    }

    /// Replace the whole bag from a trusted source and clear dirty state.
    /// An empty map leaves the entity untouched.
    pub fn replace_attributes(&mut self, attributes: Attributes) {
        if attributes.is_empty() {
            return;
        }
        self.dirty.clear();
        self.attributes = attributes.into_iter().map(|(k, v)| (k, hydrate(v))).collect();
    }

    /// Append `item` to the sequence under `key`.
    pub fn add(&mut self, key: &str, item: impl Into<Value>) {
        if let Some(mut items) = self.sequence(key) {
            items.push(item.into());
            self.set(key, Value::Array(items));
        }
    }

    /// Append `item` unless an equal value is already present.
    pub fn add_unique(&mut self, key: &str, item: impl Into<Value>) {
        let item = item.into();
        if let Some(mut items) = self.sequence(key) {
            if !items.contains(&item) {
                items.push(item);
                self.set(key, Value::Array(items));
            }
        }
    }

    /// Drop every occurrence of `item` from the sequence under `key`.
    pub fn remove(&mut self, key: &str, item: impl Into<Value>) {
        let item = item.into();
        if let Some(Value::Array(items)) = self.get(key) {
            let kept: Vec<Value> = items.iter().filter(|v| **v != item).cloned().collect();
            self.set(key, Value::Array(kept));
        }
    }

    /// Add `amount` to the number under `key`. A non-numeric amount is ignored.
    pub fn increment(&mut self, key: &str, amount: impl Into<Value>) {
        let Value::Number(amount) = amount.into() else {
            debug!(key, "increment ignored: amount is not a number");
            return;
        };
        let current = self.get(key).cloned().unwrap_or_else(|| Value::from(0));
        self.set(key, current.plus(&amount));
    }

    /// Remove `key` from the bag without marking it dirty.
    pub fn unset(&mut self, key: &str) {
        self.attributes.remove(canonical_key(key));
    }

    /// Drop every attribute and all dirty state.
    pub fn clear(&mut self) {
        self.dirty.clear();
        self.attributes.clear();
    }

    /// Current sequence under `key`; empty when unset, `None` for a non-sequence.
    fn sequence(&self, key: &str) -> Option<Vec<Value>> {
        match self.get(key) {
            None => Some(Vec::new()),
            Some(Value::Array(items)) => Some(items.clone()),
            Some(_) => None,
        }
    }

    // -----------------------------------------------------------------------
    // Identity and dirty tracking
    // -----------------------------------------------------------------------

    pub fn id(&self) -> Option<&str> {
        self.get_str(OBJECT_ID)
    }

    pub fn set_id(&mut self, id: &str) {
        self.set(OBJECT_ID, id);
    }

    /// Never persisted: no server-assigned id.
    pub fn is_new(&self) -> bool {
        self.id().is_none()
    }

    pub fn dirty(&self) -> bool {
        !self.dirty.is_empty()
    }

    pub fn has_changed(&self, key: &str) -> bool {
        self.dirty.contains(canonical_key(key))
    }

    /// Attributes whose keys are currently dirty.
    pub fn dirty_attributes(&self) -> Attributes {
        self.attributes
            .iter()
            .filter(|(k, _)| self.dirty.contains(*k))
            .map(|(k, v)| (k.clone(), v.clone()))
            .collect()
    }

    pub(crate) fn clear_dirty(&mut self) {
        self.dirty.clear();
    }

    // -----------------------------------------------------------------------
    // Wire forms
    // -----------------------------------------------------------------------

    /// `{__type: Pointer, className, objectId}`, or `{}` while unsaved.
    pub fn pointer(&self) -> Json {
        match self.id() {
            Some(id) => json!({
                TYPE_TAG: "Pointer",
                CLASS_NAME: self.class_name(),
                OBJECT_ID: id,
            }),
            None => Json::Object(Map::new()),
        }
    }

    /// Raw snapshot of the bag: no key stripping, no pointer conversion.
    pub fn to_wire_json(&self) -> Json {
        Json::Object(
            self.attributes
                .iter()
                .map(|(k, v)| (k.clone(), v.to_json()))
                .collect(),
        )
    }

    /// The inline `{__type: Object, className, ...}` shape.
    pub fn to_expanded_json(&self) -> Json {
        let mut map = Map::new();
        map.insert(TYPE_TAG.to_string(), Json::from("Object"));
        map.insert(CLASS_NAME.to_string(), Json::from(self.class_name()));
        for (k, v) in &self.attributes {
            map.insert(k.clone(), v.to_json());
        }
        Json::Object(map)
    }

    /// Payload form of `attributes`: reserved keys dropped, nested entities
    /// replaced by their pointers. Entities nested deeper than the top level
    /// keep their inline form.
    pub fn format_attributes_for_transfer(attributes: &Attributes) -> Map<String, Json> {
        attributes
            .iter()
            .filter(|(k, _)| !is_reserved(k))
            .map(|(k, v)| {
                let formatted = match v {
                    Value::Entity(entity) => entity.pointer(),
                    other => other.to_json(),
                };
                (k.clone(), formatted)
            })
            .collect()
    }

    /// A new, unsaved entity of the same kind with the current attributes
    /// minus the reserved keys.
    pub fn clone_object(&self) -> Entity {
        Entity::with_attributes(self.kind.clone(), reset(&self.attributes))
    }

    /// Server values win; local keys the server did not send are kept.
    fn merge_attributes(&self, incoming: Attributes) -> Attributes {
        let mut merged = self.attributes.clone();
        merged.extend(incoming);
        merged
    }

    fn update_attributes(&mut self, response: Option<Json>) {
        let merged = self.merge_attributes(json_attributes(response.unwrap_or(Json::Null)));
        self.replace_attributes(merged);
    }

    // -----------------------------------------------------------------------
    // Repository operations
    // -----------------------------------------------------------------------

    /// Create or update on the server.
    ///
    /// New entities send every formatted attribute and succeed on 201.
    /// Persisted entities send only dirty attributes and succeed on 200; with
    /// nothing to send the request is skipped and `false` is returned. On
    /// failure local state, dirty keys included, is left as it was.
    pub fn save(&mut self, transport: &mut impl Transport) -> bool {
        match self.id().map(str::to_string) {
            None => {
                let payload = Json::Object(Self::format_attributes_for_transfer(&self.attributes));
                let path = self.kind.path(None);
                let created = transport.request(HttpMethod::Post, &path, Some(&payload));
                if !transport.outcome().is(STATUS_CREATED) {
                    warn!(path = %path, status = transport.status_code(), error = ?transport.error(), "create failed");
                    return false;
                }
                self.dirty.clear();
                self.update_attributes(created);
                true
            }
            Some(id) => {
                let formatted = Self::format_attributes_for_transfer(&self.dirty_attributes());
                if formatted.is_empty() {
                    debug!(class = %self.class_name(), id = %id, "nothing to save");
                    return false;
                }
                let path = self.kind.path(Some(&id));
                let updated = transport.request(HttpMethod::Put, &path, Some(&Json::Object(formatted)));
                if !transport.outcome().is(STATUS_OK) {
                    warn!(path = %path, status = transport.status_code(), error = ?transport.error(), "update failed");
                    return false;
                }
                self.dirty.clear();
                self.update_attributes(updated);
                true
            }
        }
    }

    /// Apply one more local edit, then `save`.
    pub fn save_with(&mut self, key: &str, value: impl Into<Value>, transport: &mut impl Transport) -> bool {
        self.set(key, value);
        self.save(transport)
    }

    /// Save each entity in turn; true when all of them succeeded.
    pub fn save_all(entities: &mut [Entity], transport: &mut impl Transport) -> bool {
        entities
            .iter_mut()
            .fold(true, |all, entity| entity.save(transport) && all)
    }

    /// Merge the server's copy over the local attributes.
    pub fn fetch(&mut self, transport: &mut impl Transport) -> bool {
        let Some(id) = self.id().map(str::to_string) else {
            return false;
        };
        let fetched = transport.request(HttpMethod::Get, &self.kind.path(Some(&id)), None);
        if !transport.outcome().is(STATUS_OK) {
            return false;
        }
        self.dirty.clear();
        self.update_attributes(fetched);
        true
    }

    /// Delete on the server when persisted, then reset locally whatever the
    /// server answered. Returns whether the remote delete succeeded.
    pub fn destroy(&mut self, transport: &mut impl Transport) -> bool {
        let deleted = match self.id().map(str::to_string) {
            Some(id) => {
                transport.request(HttpMethod::Delete, &self.kind.path(Some(&id)), None);
                transport.outcome().is(STATUS_OK)
            }
            None => false,
        };
        self.dirty.clear();
        self.attributes = reset(&self.attributes);
        deleted
    }
}

fn canonical_key(key: &str) -> &str {
    if key == ID_ALIAS {
        OBJECT_ID
    } else {
        key
    }
}

fn is_reserved(key: &str) -> bool {
    RESERVED_KEYS.contains(&key)
}

fn reset(attributes: &Attributes) -> Attributes {
    attributes
        .iter()
        .filter(|(k, _)| !is_reserved(k))
        .map(|(k, v)| (k.clone(), v.clone()))
        .collect()
}

/// Top-level attributes of a JSON object; anything else yields none.
fn json_attributes(row: Json) -> Attributes {
    match row {
        Json::Object(map) => map.into_iter().map(|(k, v)| (k, Value::from_json(v))).collect(),
        _ => Attributes::new(),
    }
}

/// Materialize a tagged pointer or inline object into a nested entity.
fn hydrate(value: Value) -> Value {
    let mut map = match value {
        Value::Object(map) => map,
        other => return other,
    };
    let tagged = matches!(map.get(TYPE_TAG).and_then(Value::as_str), Some("Object" | "Pointer"));
    let class_name = map.get(CLASS_NAME).and_then(Value::as_str).map(str::to_string);
    match class_name {
        Some(class_name) if tagged => {
            map.remove(TYPE_TAG);
            map.remove(CLASS_NAME);
            Value::from(Entity::with_attributes(Kind::from_class_name(&class_name), map))
        }
        _ => Value::Object(map),
    }
}
