//! Transcript message tree
//!
//! The shape handed over by the message-fetching collaborator and passed on,
//! mutated, to the renderer. Field names follow the chat API's snake_case JSON
//! so captured payloads deserialize directly. Fields this crate does not model
//! are kept in each node's `extra` map, and component types it does not know
//! are kept verbatim, so everything except asset URLs survives a round trip.

pub mod visit;

use std::collections::HashMap;

use serde::{de, Deserialize, Deserializer, Serialize};
use serde_json::Value;

pub use visit::{for_each_message_mut, visit_asset_slots_mut, AssetKind, AssetSlot};

/// One chat message.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct Message {
    pub id: String,
    pub author: Author,
    #[serde(default)]
    pub content: String,
    #[serde(default)]
    pub attachments: Vec<Attachment>,
    #[serde(default)]
    pub embeds: Vec<Embed>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub poll: Option<Poll>,
    #[serde(default)]
    pub components: Vec<Component>,
    /// The message this one replies to, when captured.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub referenced_message: Option<Box<Message>>,
    #[serde(flatten)]
    pub extra: HashMap<String, Value>,
}

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct Author {
    pub id: String,
    #[serde(default)]
    pub username: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub avatar_url: Option<String>,
    #[serde(default)]
    pub bot: bool,
    #[serde(flatten)]
    pub extra: HashMap<String, Value>,
}

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct Attachment {
    pub id: String,
    pub filename: String,
    pub url: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub proxy_url: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub content_type: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub size: Option<u64>,
    #[serde(flatten)]
    pub extra: HashMap<String, Value>,
}

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct Embed {
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub title: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub description: Option<String>,
    /// Link target of the embed title. Not an asset.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub url: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub image: Option<EmbedMedia>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub thumbnail: Option<EmbedMedia>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub author: Option<EmbedAuthor>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub footer: Option<EmbedFooter>,
    #[serde(flatten)]
    pub extra: HashMap<String, Value>,
}

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct EmbedMedia {
    pub url: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub proxy_url: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub width: Option<u32>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub height: Option<u32>,
    #[serde(flatten)]
    pub extra: HashMap<String, Value>,
}

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct EmbedAuthor {
    pub name: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub url: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub icon_url: Option<String>,
    #[serde(flatten)]
    pub extra: HashMap<String, Value>,
}

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct EmbedFooter {
    pub text: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub icon_url: Option<String>,
    #[serde(flatten)]
    pub extra: HashMap<String, Value>,
}

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct Poll {
    pub question: PollMedia,
    #[serde(default)]
    pub answers: Vec<PollAnswer>,
    #[serde(flatten)]
    pub extra: HashMap<String, Value>,
}

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct PollAnswer {
    pub answer_id: u32,
    pub poll_media: PollMedia,
    #[serde(flatten)]
    pub extra: HashMap<String, Value>,
}

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct PollMedia {
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub text: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub emoji: Option<Emoji>,
    #[serde(flatten)]
    pub extra: HashMap<String, Value>,
}

/// Custom emoji. `url` is the image to render, if the emoji has one.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct Emoji {
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub id: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub name: Option<String>,
    #[serde(default)]
    pub animated: bool,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub url: Option<String>,
    #[serde(flatten)]
    pub extra: HashMap<String, Value>,
}

/// Media reference inside a layout component.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct UnfurledMedia {
    pub url: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub proxy_url: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub content_type: Option<String>,
    #[serde(flatten)]
    pub extra: HashMap<String, Value>,
}

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct MediaGalleryItem {
    pub media: UnfurledMedia,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub description: Option<String>,
    #[serde(flatten)]
    pub extra: HashMap<String, Value>,
}

/// Message layout components.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum Component {
    ActionRow {
        #[serde(default)]
        components: Vec<Component>,
        #[serde(flatten)]
        extra: HashMap<String, Value>,
    },
    Button {
        #[serde(default, skip_serializing_if = "Option::is_none")]
        label: Option<String>,
        #[serde(default, skip_serializing_if = "Option::is_none")]
        emoji: Option<Emoji>,
        #[serde(default, skip_serializing_if = "Option::is_none")]
        url: Option<String>,
        #[serde(flatten)]
        extra: HashMap<String, Value>,
    },
    Section {
        #[serde(default)]
        components: Vec<Component>,
        #[serde(default, skip_serializing_if = "Option::is_none")]
        accessory: Option<Box<Component>>,
        #[serde(flatten)]
        extra: HashMap<String, Value>,
    },
    TextDisplay {
        #[serde(default)]
        content: String,
        #[serde(flatten)]
        extra: HashMap<String, Value>,
    },
    Thumbnail {
        media: UnfurledMedia,
        #[serde(default, skip_serializing_if = "Option::is_none")]
        description: Option<String>,
        #[serde(flatten)]
        extra: HashMap<String, Value>,
    },
    MediaGallery {
        #[serde(default)]
        items: Vec<MediaGalleryItem>,
        #[serde(flatten)]
        extra: HashMap<String, Value>,
    },
    File {
        file: UnfurledMedia,
        #[serde(default, skip_serializing_if = "Option::is_none")]
        name: Option<String>,
        #[serde(flatten)]
        extra: HashMap<String, Value>,
    },
    Separator {
        #[serde(flatten)]
        extra: HashMap<String, Value>,
    },
    Container {
        #[serde(default)]
        components: Vec<Component>,
        #[serde(default, skip_serializing_if = "Option::is_none")]
        accent_color: Option<u32>,
        #[serde(flatten)]
        extra: HashMap<String, Value>,
    },
    /// A component type this crate does not model, kept as received.
    #[serde(untagged)]
    Unknown(UnknownComponent),
}

/// `type` tags handled by the [`Component`] variants above.
const KNOWN_COMPONENT_TYPES: &[&str] = &[
    "action_row",
    "button",
    "section",
    "text_display",
    "thumbnail",
    "media_gallery",
    "file",
    "separator",
    "container",
];

/// Raw JSON of an unrecognised component. A malformed component of a known
/// type is rejected rather than kept, so its media can never skip resolution.
#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(transparent)]
pub struct UnknownComponent(pub Value);

impl<'de> Deserialize<'de> for UnknownComponent {
    fn deserialize<D: Deserializer<'de>>(deserializer: D) -> Result<Self, D::Error> {
        let value = Value::deserialize(deserializer)?;
        if let Some(kind) = value.get("type").and_then(Value::as_str) {
            if KNOWN_COMPONENT_TYPES.contains(&kind) {
                return Err(de::Error::custom(format!("malformed {kind} component")));
            }
        }
        Ok(Self(value))
    }
}

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct Role {
    pub id: String,
    #[serde(default)]
    pub name: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub color: Option<u32>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub icon_url: Option<String>,
    #[serde(flatten)]
    pub extra: HashMap<String, Value>,
}

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct ChannelRef {
    pub id: String,
    #[serde(default)]
    pub name: String,
    #[serde(flatten)]
    pub extra: HashMap<String, Value>,
}

/// Lookup tables collected while the messages were parsed. Avatars and role
/// icons referenced from here are resolved alongside the messages.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct TranscriptState {
    #[serde(default)]
    pub authors: HashMap<String, Author>,
    #[serde(default)]
    pub user_mentions: HashMap<String, Author>,
    #[serde(default)]
    pub role_mentions: HashMap<String, Role>,
    #[serde(default)]
    pub channel_mentions: HashMap<String, ChannelRef>,
    #[serde(flatten)]
    pub extra: HashMap<String, Value>,
}

impl TranscriptState {
    /// Record every message author (including replied-to messages).
    pub fn collect_authors(&mut self, messages: &[Message]) {
        for message in messages {
            let mut current = Some(message);
            while let Some(m) = current {
                self.authors
                    .entry(m.author.id.clone())
                    .or_insert_with(|| m.author.clone());
                current = m.referenced_message.as_deref();
            }
        }
    }
}

/// Input document: messages plus parse state.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct Transcript {
    #[serde(default)]
    pub messages: Vec<Message>,
    #[serde(default)]
    pub state: TranscriptState,
    #[serde(flatten)]
    pub extra: HashMap<String, Value>,
}
