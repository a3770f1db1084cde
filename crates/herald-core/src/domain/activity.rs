//! Activities as seen by the delivery pipeline.
//!
//! The serialized activity is opaque to the pipeline: it is stored and sent
//! as-is. `Activity` wraps the JSON document and only reads the handful of
//! fields that drive routing (type, actor, object, audience, replies).

use std::fmt;
use std::str::FromStr;

use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};

/// The public-audience marker, in all the spellings seen on the wire.
pub const PUBLIC_AUDIENCE: &str = "https://www.w3.org/ns/activitystreams#Public";
const PUBLIC_ALIASES: [&str; 3] = [PUBLIC_AUDIENCE, "as:Public", "Public"];

pub fn is_public_marker(uri: &str) -> bool {
    PUBLIC_ALIASES.contains(&uri)
}

/// Activity type. Unknown types are carried through verbatim.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(from = "String", into = "String")]
pub enum ActivityType {
    Create,
    Update,
    Delete,
    Follow,
    Accept,
    Reject,
    Announce,
    Like,
    Move,
    Undo,
    Add,
    Remove,
    Block,
    Other(String),
}

impl ActivityType {
    pub fn as_str(&self) -> &str {
        match self {
            ActivityType::Create => "Create",
            ActivityType::Update => "Update",
            ActivityType::Delete => "Delete",
            ActivityType::Follow => "Follow",
            ActivityType::Accept => "Accept",
            ActivityType::Reject => "Reject",
            ActivityType::Announce => "Announce",
            ActivityType::Like => "Like",
            ActivityType::Move => "Move",
            ActivityType::Undo => "Undo",
            ActivityType::Add => "Add",
            ActivityType::Remove => "Remove",
            ActivityType::Block => "Block",
            ActivityType::Other(other) => other,
        }
    }

    /// The activity that reverses this one, used by the undo operation.
    pub fn inverse(&self) -> ActivityType {
        match self {
            ActivityType::Create => ActivityType::Delete,
            ActivityType::Add => ActivityType::Remove,
            _ => ActivityType::Undo,
        }
    }
}

impl From<&str> for ActivityType {
    fn from(s: &str) -> Self {
        match s {
            "Create" => ActivityType::Create,
            "Update" => ActivityType::Update,
            "Delete" => ActivityType::Delete,
            "Follow" => ActivityType::Follow,
            "Accept" => ActivityType::Accept,
            "Reject" => ActivityType::Reject,
            "Announce" => ActivityType::Announce,
            "Like" => ActivityType::Like,
            "Move" => ActivityType::Move,
            "Undo" => ActivityType::Undo,
            "Add" => ActivityType::Add,
            "Remove" => ActivityType::Remove,
            "Block" => ActivityType::Block,
            other => ActivityType::Other(other.to_string()),
        }
    }
}

impl From<String> for ActivityType {
    fn from(s: String) -> Self {
        ActivityType::from(s.as_str())
    }
}

impl From<ActivityType> for String {
    fn from(kind: ActivityType) -> Self {
        kind.as_str().to_string()
    }
}

impl fmt::Display for ActivityType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Which local identity authored an activity.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ActorKind {
    User,
    Blog,
    Application,
}

impl ActorKind {
    pub fn as_str(self) -> &'static str {
        match self {
            ActorKind::User => "user",
            ActorKind::Blog => "blog",
            ActorKind::Application => "application",
        }
    }
}

impl FromStr for ActorKind {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "user" => Ok(ActorKind::User),
            "blog" => Ok(ActorKind::Blog),
            "application" => Ok(ActorKind::Application),
            other => Err(format!("unknown actor kind: {other}")),
        }
    }
}

impl fmt::Display for ActorKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Content visibility of an outbox item.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "kebab-case")]
pub enum Visibility {
    Public,
    QuietPublic,
    Private,
    LocalOnly,
}

impl Visibility {
    pub fn as_str(self) -> &'static str {
        match self {
            Visibility::Public => "public",
            Visibility::QuietPublic => "quiet-public",
            Visibility::Private => "private",
            Visibility::LocalOnly => "local-only",
        }
    }

    /// Private and local-only content never reaches followers.
    pub fn allows_follower_fan_out(self) -> bool {
        matches!(self, Visibility::Public | Visibility::QuietPublic)
    }
}

impl FromStr for Visibility {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "public" => Ok(Visibility::Public),
            "quiet-public" | "quiet_public" => Ok(Visibility::QuietPublic),
            "private" => Ok(Visibility::Private),
            "local-only" | "local" => Ok(Visibility::LocalOnly),
            other => Err(format!("unknown visibility: {other}")),
        }
    }
}

impl fmt::Display for Visibility {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// An activity document.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(transparent)]
pub struct Activity(Value);

impl Activity {
    /// Wrap a JSON document. Only objects are activities.
    pub fn from_value(value: Value) -> Option<Self> {
        value.is_object().then_some(Self(value))
    }

    /// Build a minimal activity of the given type.
    pub fn new(kind: ActivityType, actor: &str, object: Value) -> Self {
        let mut map = Map::new();
        map.insert("type".into(), Value::String(kind.into()));
        map.insert("actor".into(), Value::String(actor.to_string()));
        map.insert("object".into(), object);
        Self(Value::Object(map))
    }

    /// Build an activity of `kind` whose object is `inner`, copying the
    /// inner document's actor and addressing.
    pub fn wrap(kind: ActivityType, inner: Value) -> Self {
        let mut map = Map::new();
        map.insert("type".into(), Value::String(kind.clone().into()));
        if let Some(id) = inner.get("id").and_then(Value::as_str) {
            map.insert(
                "id".into(),
                Value::String(format!("{id}#{}", kind.as_str().to_lowercase())),
            );
        }
        let actor = inner
            .get("actor")
            .or_else(|| inner.get("attributedTo"))
            .cloned();
        if let Some(actor) = actor {
            map.insert("actor".into(), actor);
        }
        for field in ["to", "cc"] {
            if let Some(value) = inner.get(field) {
                map.insert(field.into(), value.clone());
            }
        }
        map.insert("object".into(), inner);
        Self(Value::Object(map))
    }

    /// Reissue this activity as `kind` against the same object, keeping
    /// actor, addressing and target. Used for Create→Delete and Add→Remove.
    pub fn reissue(&self, kind: ActivityType) -> Self {
        let mut map = Map::new();
        map.insert("type".into(), Value::String(kind.clone().into()));
        if let Some(id) = self.id() {
            map.insert(
                "id".into(),
                Value::String(format!("{id}#{}", kind.as_str().to_lowercase())),
            );
        }
        for field in ["actor", "to", "cc", "object", "target"] {
            if let Some(value) = self.0.get(field) {
                map.insert(field.into(), value.clone());
            }
        }
        Self(Value::Object(map))
    }

    pub fn with_field(mut self, field: &str, value: Value) -> Self {
        if let Value::Object(map) = &mut self.0 {
            map.insert(field.to_string(), value);
        }
        self
    }

    pub fn as_value(&self) -> &Value {
        &self.0
    }

    pub fn into_value(self) -> Value {
        self.0
    }

    pub fn kind(&self) -> Option<ActivityType> {
        match self.0.get("type")? {
            Value::String(s) => Some(ActivityType::from(s.as_str())),
            Value::Array(items) => items.first()?.as_str().map(ActivityType::from),
            _ => None,
        }
    }

    pub fn id(&self) -> Option<&str> {
        self.0.get("id").and_then(Value::as_str)
    }

    pub fn actor(&self) -> Option<String> {
        self.0.get("actor").and_then(|v| uris(v).into_iter().next())
    }

    pub fn object(&self) -> Option<&Value> {
        self.0.get("object")
    }

    /// The URI of the object this activity targets.
    ///
    /// A bare string object is its own reference; an embedded object
    /// contributes its `id`; an embedded activity without an id is followed
    /// down to its own object.
    pub fn object_reference(&self) -> Option<String> {
        object_reference(self.object()?)
    }

    /// Union of the `to` and `cc` fields.
    pub fn audience(&self) -> Vec<String> {
        let mut out = Vec::new();
        for field in ["to", "cc"] {
            if let Some(value) = self.0.get(field) {
                out.extend(uris(value));
            }
        }
        out
    }

    /// Every addressing field, including the blind ones.
    pub fn all_recipients(&self) -> Vec<String> {
        let mut out = Vec::new();
        for field in ["to", "cc", "bto", "bcc", "audience"] {
            if let Some(value) = self.0.get(field) {
                out.extend(uris(value));
            }
        }
        out.sort();
        out.dedup();
        out
    }

    pub fn is_public(&self) -> bool {
        self.audience().iter().any(|uri| is_public_marker(uri))
    }

    /// `inReplyTo` targets of the embedded object.
    pub fn in_reply_to(&self) -> Vec<String> {
        self.object()
            .and_then(|object| object.get("inReplyTo"))
            .map(uris)
            .unwrap_or_default()
    }
}

fn object_reference(object: &Value) -> Option<String> {
    match object {
        Value::String(s) if !s.is_empty() => Some(s.clone()),
        Value::Object(map) => match map.get("id").and_then(Value::as_str) {
            Some(id) if !id.is_empty() => Some(id.to_string()),
            _ => object_reference(map.get("object")?),
        },
        Value::Array(items) => items.first().and_then(object_reference),
        _ => None,
    }
}

/// Collect URIs from a link-ish JSON value: a string, an object with an
/// `id` or `href`, or an array of those.
pub fn uris(value: &Value) -> Vec<String> {
    match value {
        Value::String(s) => vec![s.clone()],
        Value::Array(items) => items.iter().flat_map(uris).collect(),
        Value::Object(map) => map
            .get("id")
            .or_else(|| map.get("href"))
            .and_then(Value::as_str)
            .map(|s| vec![s.to_string()])
            .unwrap_or_default(),
        _ => Vec::new(),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use rstest::rstest;
    use serde_json::json;

    #[rstest]
    #[case::create(ActivityType::Create, ActivityType::Delete)]
    #[case::add(ActivityType::Add, ActivityType::Remove)]
    #[case::like(ActivityType::Like, ActivityType::Undo)]
    #[case::follow(ActivityType::Follow, ActivityType::Undo)]
    #[case::announce(ActivityType::Announce, ActivityType::Undo)]
    fn inverse_types(#[case] kind: ActivityType, #[case] expected: ActivityType) {
        assert_eq!(kind.inverse(), expected);
    }

    #[test]
    fn unknown_types_survive_serde() {
        let kind: ActivityType = serde_json::from_str("\"EmojiReact\"").unwrap();
        assert_eq!(kind, ActivityType::Other("EmojiReact".into()));
        assert_eq!(serde_json::to_string(&kind).unwrap(), "\"EmojiReact\"");
    }

    #[test]
    fn visibility_uses_kebab_case() {
        assert_eq!(
            serde_json::to_string(&Visibility::QuietPublic).unwrap(),
            "\"quiet-public\""
        );
        assert_eq!("local-only".parse::<Visibility>().unwrap(), Visibility::LocalOnly);
        assert!(!Visibility::Private.allows_follower_fan_out());
        assert!(Visibility::QuietPublic.allows_follower_fan_out());
    }

    #[test]
    fn object_reference_from_string_and_embedded_object() {
        let a = Activity::new(ActivityType::Like, "https://l/u/1", json!("https://r/p/9"));
        assert_eq!(a.object_reference().as_deref(), Some("https://r/p/9"));

        let b = Activity::new(
            ActivityType::Create,
            "https://l/u/1",
            json!({"id": "https://l/p/1", "type": "Note"}),
        );
        assert_eq!(b.object_reference().as_deref(), Some("https://l/p/1"));
    }

    #[test]
    fn object_reference_follows_anonymous_activity() {
        let inner = json!({"type": "Follow", "object": "https://r/u/2"});
        let undo = Activity::new(ActivityType::Undo, "https://l/u/1", inner);
        assert_eq!(undo.object_reference().as_deref(), Some("https://r/u/2"));
    }

    #[test]
    fn missing_object_has_no_reference() {
        let a = Activity::from_value(json!({"type": "Create"})).unwrap();
        assert_eq!(a.object_reference(), None);
        assert!(Activity::from_value(json!("Create")).is_none());
    }

    #[test]
    fn audience_is_union_of_to_and_cc() {
        let a = Activity::from_value(json!({
            "type": "Create",
            "to": PUBLIC_AUDIENCE,
            "cc": ["https://l/u/1/followers", {"id": "https://r/u/5"}],
            "bcc": ["https://r/u/6"],
        }))
        .unwrap();
        assert_eq!(
            a.audience(),
            vec![
                PUBLIC_AUDIENCE.to_string(),
                "https://l/u/1/followers".to_string(),
                "https://r/u/5".to_string()
            ]
        );
        assert!(a.is_public());
        assert!(a.all_recipients().contains(&"https://r/u/6".to_string()));
    }

    #[test]
    fn wrap_copies_actor_and_addressing() {
        let inner = json!({
            "id": "https://l/a/1",
            "type": "Like",
            "actor": "https://l/u/1",
            "object": "https://r/p/1",
            "to": ["https://r/u/2"],
        });
        let undo = Activity::wrap(ActivityType::Undo, inner.clone());
        assert_eq!(undo.kind(), Some(ActivityType::Undo));
        assert_eq!(undo.actor().as_deref(), Some("https://l/u/1"));
        assert_eq!(undo.id(), Some("https://l/a/1#undo"));
        assert_eq!(undo.object(), Some(&inner));
        assert_eq!(undo.audience(), vec!["https://r/u/2".to_string()]);
    }

    #[test]
    fn in_reply_to_reads_embedded_object() {
        let a = Activity::new(
            ActivityType::Create,
            "https://l/u/1",
            json!({"id": "https://l/p/2", "inReplyTo": "https://r/p/1"}),
        );
        assert_eq!(a.in_reply_to(), vec!["https://r/p/1".to_string()]);
    }

    #[test]
    fn reissue_keeps_object_and_addressing() {
        let create = Activity::from_value(json!({
            "id": "https://l/a/7",
            "type": "Create",
            "actor": "https://l/u/1",
            "to": [PUBLIC_AUDIENCE],
            "object": {"id": "https://l/p/7", "type": "Note", "content": "hi"},
        }))
        .unwrap();

        let delete = create.reissue(ActivityType::Delete);
        assert_eq!(delete.kind(), Some(ActivityType::Delete));
        assert_eq!(delete.id(), Some("https://l/a/7#delete"));
        assert_eq!(delete.object_reference().as_deref(), Some("https://l/p/7"));
        assert!(delete.is_public());
    }
}
