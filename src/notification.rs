//! Extraction of message fields from raw chat-platform events.

use serde_json::Value;

/// Suffix shared by every message type tag, e.g. `imageMessage`.
const TYPE_TAG_SUFFIX: &str = "Message";

/// Kind of downloadable media a message carries.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum MediaCategory {
    Image,
    Video,
    Document,
    Audio,
}

impl MediaCategory {
    /// Recognise `imageMessage`, `videoMessage`, `documentMessage` and
    /// `audioMessage`. Everything else carries no media.
    pub fn from_type_tag(tag: &str) -> Option<Self> {
        match tag.strip_suffix(TYPE_TAG_SUFFIX)? {
            "image" => Some(MediaCategory::Image),
            "video" => Some(MediaCategory::Video),
            "document" => Some(MediaCategory::Document),
            "audio" => Some(MediaCategory::Audio),
            _ => None,
        }
    }

    /// Directory name used inside a recipient's vault folder.
    pub fn as_str(&self) -> &'static str {
        match self {
            MediaCategory::Image => "image",
            MediaCategory::Video => "video",
            MediaCategory::Document => "document",
            MediaCategory::Audio => "audio",
        }
    }
}

#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct SenderData {
    pub chat_id: String,
    pub chat_name: String,
    pub sender: String,
}

#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct FileData {
    pub file_name: String,
    pub download_url: String,
    pub mime_type: String,
}

/// One inbound event, built fresh per delivery and never shared.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Notification {
    pub webhook_type: String,
    pub message_id: String,
    /// Raw `typeMessage` tag as delivered.
    pub message_type: String,
    pub media: Option<MediaCategory>,
    pub sender: SenderData,
    /// Empty unless `media` is set.
    pub file: FileData,
}

impl Notification {
    /// Pure extraction: missing or non-string fields become empty strings.
    pub fn classify(raw: &Value) -> Self {
        let message_type = text(raw, "/messageData/typeMessage");
        let media = MediaCategory::from_type_tag(&message_type);

        let file = if media.is_some() {
            FileData {
                file_name: text(raw, "/messageData/fileMessageData/fileName"),
                download_url: text(raw, "/messageData/fileMessageData/downloadUrl"),
                mime_type: text(raw, "/messageData/fileMessageData/mimeType"),
            }
        } else {
            FileData::default()
        };

        Self {
            webhook_type: text(raw, "/typeWebhook"),
            message_id: text(raw, "/idMessage"),
            message_type,
            media,
            sender: SenderData {
                chat_id: text(raw, "/senderData/chatId"),
                chat_name: text(raw, "/senderData/chatName"),
                sender: text(raw, "/senderData/sender"),
            },
            file,
        }
    }

    /// Media category, but only when there is something to download.
    pub fn downloadable_media(&self) -> Option<MediaCategory> {
        if self.file.download_url.is_empty() || self.file.file_name.is_empty() {
            return None;
        }
        self.media
    }
}

fn text(raw: &Value, pointer: &str) -> String {
    raw.pointer(pointer)
        .and_then(Value::as_str)
        .unwrap_or_default()
        .to_string()
}
