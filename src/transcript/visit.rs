//! Enumeration of URL-bearing fields
//!
//! The visitors hand out mutable slots so callers can read the original URL
//! and later write the resolved value back in place.

use super::{Component, Emoji, Message, TranscriptState};

/// Where an asset reference lives.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum AssetKind {
    Avatar,
    Attachment,
    EmbedImage,
    EmbedThumbnail,
    EmbedIcon,
    Emoji,
    ComponentThumbnail,
    ComponentGallery,
    ComponentFile,
    RoleIcon,
}

/// A mutable URL field. Optional slots may be cleared; required ones cannot.
#[derive(Debug)]
pub enum AssetSlot<'a> {
    Required(&'a mut String),
    Optional(&'a mut Option<String>),
}

impl AssetSlot<'_> {
    /// Current URL, if any.
    pub fn url(&self) -> Option<&str> {
        match self {
            Self::Required(s) => Some(s.as_str()),
            Self::Optional(s) => s.as_deref(),
        }
    }

    /// Store `value`. A required slot given `None` receives `fallback`.
    pub fn set(&mut self, value: Option<String>, fallback: &str) {
        match self {
            Self::Required(s) => **s = value.unwrap_or_else(|| fallback.to_string()),
            Self::Optional(s) => **s = value,
        }
    }

    pub fn is_optional(&self) -> bool {
        matches!(self, Self::Optional(_))
    }
}

/// Apply `f` to every message, including captured replied-to messages.
pub fn for_each_message_mut(messages: &mut [Message], f: &mut dyn FnMut(&mut Message)) {
    for message in messages {
        let mut current = Some(message);
        while let Some(m) = current {
            f(m);
            current = m.referenced_message.as_deref_mut();
        }
    }
}

fn emoji_slot<'a>(emoji: &'a mut Option<Emoji>, f: &mut dyn FnMut(AssetKind, AssetSlot<'a>)) {
    if let Some(emoji) = emoji {
        f(AssetKind::Emoji, AssetSlot::Optional(&mut emoji.url));
    }
}

fn component_slots<'a>(
    components: &'a mut [Component],
    f: &mut dyn FnMut(AssetKind, AssetSlot<'a>),
) {
    for component in components {
        match component {
            Component::ActionRow { components, .. } | Component::Container { components, .. } => {
                component_slots(components, f)
            }
            Component::Section {
                components,
                accessory,
                ..
            } => {
                component_slots(components, f);
                if let Some(accessory) = accessory {
                    component_slots(std::slice::from_mut(accessory.as_mut()), f);
                }
            }
            Component::Button { emoji, .. } => emoji_slot(emoji, f),
            Component::Thumbnail { media, .. } => {
                f(AssetKind::ComponentThumbnail, AssetSlot::Required(&mut media.url))
            }
            Component::MediaGallery { items, .. } => {
                for item in items {
                    f(AssetKind::ComponentGallery, AssetSlot::Required(&mut item.media.url));
                }
            }
            Component::File { file, .. } => {
                f(AssetKind::ComponentFile, AssetSlot::Required(&mut file.url))
            }
            Component::TextDisplay { .. } | Component::Separator { .. } | Component::Unknown(_) => {}
        }
    }
}

/// Visit the asset slots of one message, not descending into the message it
/// replies to.
pub fn message_slots<'a>(message: &'a mut Message, f: &mut dyn FnMut(AssetKind, AssetSlot<'a>)) {
    f(AssetKind::Avatar, AssetSlot::Optional(&mut message.author.avatar_url));

    for attachment in &mut message.attachments {
        f(AssetKind::Attachment, AssetSlot::Required(&mut attachment.url));
    }

    for embed in &mut message.embeds {
        if let Some(image) = &mut embed.image {
            f(AssetKind::EmbedImage, AssetSlot::Required(&mut image.url));
        }
        if let Some(thumbnail) = &mut embed.thumbnail {
            f(AssetKind::EmbedThumbnail, AssetSlot::Required(&mut thumbnail.url));
        }
        if let Some(author) = &mut embed.author {
            f(AssetKind::EmbedIcon, AssetSlot::Optional(&mut author.icon_url));
        }
        if let Some(footer) = &mut embed.footer {
            f(AssetKind::EmbedIcon, AssetSlot::Optional(&mut footer.icon_url));
        }
    }

    if let Some(poll) = &mut message.poll {
        emoji_slot(&mut poll.question.emoji, f);
        for answer in &mut poll.answers {
            emoji_slot(&mut answer.poll_media.emoji, f);
        }
    }

    component_slots(&mut message.components, f);
}

/// Visit every asset slot in the messages (replies included) and the state.
pub fn visit_asset_slots_mut(
    messages: &mut [Message],
    state: &mut TranscriptState,
    f: &mut dyn FnMut(AssetKind, AssetSlot<'_>),
) {
    for_each_message_mut(messages, &mut |message| {
        message_slots(message, &mut |kind, slot| f(kind, slot))
    });

    for author in state
        .authors
        .values_mut()
        .chain(state.user_mentions.values_mut())
    {
        f(AssetKind::Avatar, AssetSlot::Optional(&mut author.avatar_url));
    }
    for role in state.role_mentions.values_mut() {
        f(AssetKind::RoleIcon, AssetSlot::Optional(&mut role.icon_url));
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::transcript::*;
    use std::collections::HashMap;

    fn sample() -> (Vec<Message>, TranscriptState) {
        let message = Message {
            id: "1".to_string(),
            author: Author {
                id: "u1".to_string(),
                avatar_url: Some("https://cdn.example/avatar.png".to_string()),
                ..Author::default()
            },
            attachments: vec![Attachment {
                id: "a1".to_string(),
                filename: "cat.png".to_string(),
                url: "https://cdn.example/cat.png".to_string(),
                ..Attachment::default()
            }],
            embeds: vec![Embed {
                image: Some(EmbedMedia {
                    url: "https://img.example/i.png".to_string(),
                    ..EmbedMedia::default()
                }),
                thumbnail: Some(EmbedMedia {
                    url: "https://img.example/t.png".to_string(),
                    ..EmbedMedia::default()
                }),
                footer: Some(EmbedFooter {
                    text: "f".to_string(),
                    icon_url: Some("https://img.example/f.png".to_string()),
                    ..EmbedFooter::default()
                }),
                url: Some("https://link.example/not-an-asset".to_string()),
                ..Embed::default()
            }],
            poll: Some(Poll {
                question: PollMedia {
                    text: Some("q".to_string()),
                    emoji: Some(Emoji {
                        url: Some("https://img.example/e.png".to_string()),
                        ..Emoji::default()
                    }),
                    ..PollMedia::default()
                },
                ..Poll::default()
            }),
            components: vec![Component::Container {
                components: vec![
                    Component::Section {
                        components: vec![],
                        accessory: Some(Box::new(Component::Thumbnail {
                            media: UnfurledMedia {
                                url: "https://img.example/th.png".to_string(),
                                ..UnfurledMedia::default()
                            },
                            description: None,
                            extra: HashMap::new(),
                        })),
                        extra: HashMap::new(),
                    },
                    Component::MediaGallery {
                        items: vec![MediaGalleryItem {
                            media: UnfurledMedia {
                                url: "attachment://cat.png".to_string(),
                                ..UnfurledMedia::default()
                            },
                            ..MediaGalleryItem::default()
                        }],
                        extra: HashMap::new(),
                    },
                    Component::File {
                        file: UnfurledMedia {
                            url: "https://img.example/doc.pdf".to_string(),
                            ..UnfurledMedia::default()
                        },
                        name: None,
                        extra: HashMap::new(),
                    },
                ],
                accent_color: None,
                extra: HashMap::new(),
            }],
            referenced_message: Some(Box::new(Message {
                id: "0".to_string(),
                author: Author {
                    id: "u0".to_string(),
                    avatar_url: Some("https://cdn.example/u0.png".to_string()),
                    ..Author::default()
                },
                ..Message::default()
            })),
            ..Message::default()
        };

        let mut state = TranscriptState::default();
        state.role_mentions.insert(
            "r1".to_string(),
            Role {
                id: "r1".to_string(),
                icon_url: Some("https://img.example/role.png".to_string()),
                ..Role::default()
            },
        );
        (vec![message], state)
    }

    #[test]
    fn test_visits_every_asset_field() {
        let (mut messages, mut state) = sample();
        let mut seen = Vec::new();
        visit_asset_slots_mut(&mut messages, &mut state, &mut |kind, slot| {
            if let Some(url) = slot.url() {
                seen.push((kind, url.to_string()));
            }
        });

        let urls: Vec<&str> = seen.iter().map(|(_, u)| u.as_str()).collect();
        for expected in [
            "https://cdn.example/avatar.png",
            "https://cdn.example/cat.png",
            "https://img.example/i.png",
            "https://img.example/t.png",
            "https://img.example/f.png",
            "https://img.example/e.png",
            "https://img.example/th.png",
            "attachment://cat.png",
            "https://img.example/doc.pdf",
            "https://cdn.example/u0.png",
            "https://img.example/role.png",
        ] {
            assert!(urls.contains(&expected), "missing {expected}");
        }
        assert!(!urls.contains(&"https://link.example/not-an-asset"));
        assert!(seen.contains(&(AssetKind::RoleIcon, "https://img.example/role.png".to_string())));
        assert!(seen.contains(&(AssetKind::ComponentThumbnail, "https://img.example/th.png".to_string())));
    }

    #[test]
    fn test_slots_write_back() {
        let (mut messages, mut state) = sample();
        visit_asset_slots_mut(&mut messages, &mut state, &mut |kind, mut slot| {
            let value = match kind {
                AssetKind::Avatar => None,
                _ => Some("resolved".to_string()),
            };
            slot.set(value, "fallback");
        });

        let message = &messages[0];
        assert_eq!(message.author.avatar_url, None);
        assert_eq!(message.attachments[0].url, "resolved");
        assert_eq!(message.embeds[0].image.as_ref().unwrap().url, "resolved");
        assert_eq!(
            message.embeds[0].url.as_deref(),
            Some("https://link.example/not-an-asset")
        );
        assert_eq!(
            message.referenced_message.as_ref().unwrap().author.avatar_url,
            None
        );
        assert_eq!(
            state.role_mentions["r1"].icon_url.as_deref(),
            Some("resolved")
        );
    }

    #[test]
    fn test_required_slot_never_cleared() {
        let mut url = "https://x.example/a.png".to_string();
        let mut slot = AssetSlot::Required(&mut url);
        assert!(!slot.is_optional());
        slot.set(None, "fallback");
        assert_eq!(url, "fallback");
    }
}
