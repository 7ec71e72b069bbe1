//! Event codec: canonical tag layout for every event kind the protocol uses.
//!
//! Building signs with the local [`Identity`]. Parsing reads tags only, ignores
//! unknown tags and fills defaults for missing optional ones. A malformed event
//! yields an error for that event alone; callers skip it and keep going.

use crate::error::{WireError, WireResult};
use nostr::nips::nip04;
use nostr::{Event, EventBuilder, Kind, PublicKey, Tag, Timestamp};
use reach_types::{CardBody, Capability, Heartbeat, Identity, Protocol, ServiceCard, Status};
use serde_json::json;

/// Parameterized-replaceable kind carrying a service card.
pub const KIND_SERVICE_CARD: u16 = 31990;
/// Parameterized-replaceable kind carrying a heartbeat.
pub const KIND_HEARTBEAT: u16 = 31991;
/// NIP-04 encrypted direct message.
pub const KIND_DIRECT_MESSAGE: u16 = 4;
/// NIP-01 profile metadata.
pub const KIND_METADATA: u16 = 0;

/// NIP-32 namespace shared by every protocol event.
pub const LABEL_NAMESPACE: &str = "agent-reach";
pub const LABEL_SERVICE_CARD: &str = "service-card";
pub const LABEL_HEARTBEAT: &str = "heartbeat";

const DEFAULT_CARD_ID: &str = "default";
const DEFAULT_AGENT_NAME: &str = "Unknown Agent";

fn tag<I, S>(parts: I) -> WireResult<Tag>
where
    I: IntoIterator<Item = S>,
    S: Into<String>,
{
    Tag::parse(parts.into_iter().map(Into::into).collect::<Vec<String>>())
        .map_err(|e| WireError::Malformed(e.to_string()))
}

fn label_tags(label: &str) -> WireResult<Vec<Tag>> {
    Ok(vec![
        tag(["L", LABEL_NAMESPACE])?,
        tag(["l", label, LABEL_NAMESPACE])?,
    ])
}

fn sign(identity: &Identity, builder: EventBuilder, created_at: Option<u64>) -> WireResult<Event> {
    let builder = match created_at {
        Some(secs) => builder.custom_created_at(Timestamp::from(secs)),
        None => builder,
    };
    builder
        .sign_with_keys(identity.keys())
        .map_err(|e| WireError::Signing(e.to_string()))
}

fn expect_kind(event: &Event, expected: u16) -> WireResult<()> {
    let actual = event.kind.as_u16();
    if actual != expected {
        return Err(WireError::WrongKind { expected, actual });
    }
    Ok(())
}

/// Tag values of an event as string slices, one `Vec` per tag.
fn tag_values(event: &Event) -> impl Iterator<Item = Vec<&str>> {
    event
        .tags
        .iter()
        .map(|t| t.as_slice().iter().map(String::as_str).collect::<Vec<_>>())
        .filter(|v| !v.is_empty())
}

fn card_tags(body: &CardBody) -> WireResult<Vec<Tag>> {
    let mut tags = vec![
        tag(["d", body.card_id.as_str()])?,
        tag(["name", body.name.as_str()])?,
        tag(["about", body.about.as_str()])?,
    ];
    tags.extend(label_tags(LABEL_SERVICE_CARD)?);

    for cap in &body.capabilities {
        tags.push(tag(["c", cap.id.as_str(), cap.description.as_str()])?);
    }
    for proto in &body.protocols {
        tags.push(tag(["r", proto.kind(), proto.endpoint()])?);
        if let Protocol::Dvm { kinds, .. } = proto {
            for kind in kinds {
                tags.push(tag(["k".to_string(), kind.to_string()])?);
            }
        }
    }

    for (name, value) in [
        ("color", &body.color),
        ("avatar", &body.avatar),
        ("banner", &body.banner),
    ] {
        if let Some(value) = value.as_deref().filter(|v| !v.is_empty()) {
            tags.push(tag([name, value])?);
        }
    }
    Ok(tags)
}

/// Build and sign a service card event timestamped now.
pub fn build_service_card(identity: &Identity, body: &CardBody) -> WireResult<Event> {
    build_service_card_inner(identity, body, None)
}

/// Build and sign a service card event with an explicit `created_at`.
pub fn build_service_card_at(
    identity: &Identity,
    body: &CardBody,
    created_at: u64,
) -> WireResult<Event> {
    build_service_card_inner(identity, body, Some(created_at))
}

fn build_service_card_inner(
    identity: &Identity,
    body: &CardBody,
    created_at: Option<u64>,
) -> WireResult<Event> {
    // Content mirrors the tags for readers that only look at content.
    let content = json!({
        "name": body.name,
        "about": body.about,
        "capabilities": body.capabilities,
        "protocols": body.protocols,
    })
    .to_string();
    let builder =
        EventBuilder::new(Kind::Custom(KIND_SERVICE_CARD), content).tags(card_tags(body)?);
    sign(identity, builder, created_at)
}

/// Decode a service card event.
pub fn parse_service_card(event: &Event) -> WireResult<ServiceCard> {
    expect_kind(event, KIND_SERVICE_CARD)?;

    let mut body = CardBody::default();
    let mut card_id = None;
    let mut name = None;
    let mut dvm_kinds = Vec::new();

    for values in tag_values(event) {
        let first = values.get(1).copied();
        match (values[0], first) {
            ("d", Some(v)) => card_id = Some(v.to_string()),
            ("name", Some(v)) => name = Some(v.to_string()),
            ("about", Some(v)) => body.about = v.to_string(),
            ("c", Some(id)) if !id.is_empty() => {
                let desc = values.get(2).copied().unwrap_or_default();
                body.capabilities.push(Capability::new(id, desc));
            }
            ("r", Some(kind)) if !kind.is_empty() => {
                let endpoint = values.get(2).copied().unwrap_or_default();
                body.protocols.push(Protocol::from_parts(kind, endpoint));
            }
            ("k", Some(v)) => {
                if let Ok(kind) = v.parse::<u16>() {
                    dvm_kinds.push(kind);
                }
            }
            ("color", Some(v)) => body.color = Some(v.to_string()),
            ("avatar", Some(v)) => body.avatar = Some(v.to_string()),
            ("banner", Some(v)) => body.banner = Some(v.to_string()),
            _ => {}
        }
    }

    for proto in &mut body.protocols {
        if let Protocol::Dvm { kinds, .. } = proto {
            *kinds = dvm_kinds.clone();
        }
    }

    body.card_id = card_id.unwrap_or_else(|| DEFAULT_CARD_ID.to_string());
    body.name = name.unwrap_or_else(|| DEFAULT_AGENT_NAME.to_string());

    Ok(ServiceCard {
        pubkey: event.pubkey.to_hex(),
        event_id: event.id.to_hex(),
        created_at: event.created_at.as_u64(),
        body,
    })
}

/// Build and sign a heartbeat event timestamped now.
pub fn build_heartbeat(identity: &Identity, card_id: &str, status: Status) -> WireResult<Event> {
    build_heartbeat_inner(identity, card_id, status, None)
}

/// Build and sign a heartbeat event with an explicit `created_at`.
pub fn build_heartbeat_at(
    identity: &Identity,
    card_id: &str,
    status: Status,
    created_at: u64,
) -> WireResult<Event> {
    build_heartbeat_inner(identity, card_id, status, Some(created_at))
}

fn build_heartbeat_inner(
    identity: &Identity,
    card_id: &str,
    status: Status,
    created_at: Option<u64>,
) -> WireResult<Event> {
    let status_str = status.to_string();
    let mut tags = vec![tag(["d", card_id])?, tag(["s", status_str.as_str()])?];
    tags.extend(label_tags(LABEL_HEARTBEAT)?);
    let content = json!({ "status": status_str }).to_string();
    let builder = EventBuilder::new(Kind::Custom(KIND_HEARTBEAT), content).tags(tags);
    sign(identity, builder, created_at)
}

/// Decode a heartbeat event. A missing or unknown status is malformed.
pub fn parse_heartbeat(event: &Event) -> WireResult<Heartbeat> {
    expect_kind(event, KIND_HEARTBEAT)?;

    let mut card_id = None;
    let mut status = None;
    for values in tag_values(event) {
        match (values[0], values.get(1)) {
            ("d", Some(v)) => card_id = Some(v.to_string()),
            ("s", Some(v)) => {
                status = Some(
                    v.parse::<Status>()
                        .map_err(|e| WireError::Malformed(e.to_string()))?,
                )
            }
            _ => {}
        }
    }

    let status = status.ok_or_else(|| WireError::Malformed("heartbeat without status".into()))?;
    Ok(Heartbeat {
        pubkey: event.pubkey.to_hex(),
        card_id: card_id.unwrap_or_else(|| DEFAULT_CARD_ID.to_string()),
        status,
        created_at: event.created_at.as_u64(),
        event_id: event.id.to_hex(),
    })
}

/// Encrypt `plaintext` for `recipient` and sign it as a NIP-04 DM.
pub fn build_direct_message(
    identity: &Identity,
    recipient: &PublicKey,
    plaintext: &str,
) -> WireResult<Event> {
    let secret = identity.keys().secret_key();
    let ciphertext = nip04::encrypt(secret, recipient, plaintext)
        .map_err(|e| WireError::Encryption(e.to_string()))?;
    let builder = EventBuilder::new(Kind::Custom(KIND_DIRECT_MESSAGE), ciphertext)
        .tag(Tag::public_key(*recipient));
    sign(identity, builder, None)
}

/// Decrypt a NIP-04 DM addressed to `identity`.
pub fn decrypt_direct_message(identity: &Identity, event: &Event) -> WireResult<String> {
    expect_kind(event, KIND_DIRECT_MESSAGE)?;
    let secret = identity.keys().secret_key();
    nip04::decrypt(secret, &event.pubkey, &event.content)
        .map_err(|e| WireError::Encryption(e.to_string()))
}

/// Recipient public keys (`p` tags) of an event, as they appear on the wire.
pub fn recipients(event: &Event) -> Vec<String> {
    tag_values(event)
        .filter(|v| v[0] == "p" && v.len() >= 2)
        .map(|v| v[1].to_ascii_lowercase())
        .collect()
}

/// Profile picture URL from a kind-0 metadata event, if any.
pub fn parse_profile_picture(event: &Event) -> Option<String> {
    if event.kind.as_u16() != KIND_METADATA {
        return None;
    }
    let metadata: serde_json::Value = serde_json::from_str(&event.content).ok()?;
    metadata
        .get("picture")
        .and_then(|p| p.as_str())
        .map(str::trim)
        .filter(|p| !p.is_empty())
        .map(String::from)
}

#[cfg(test)]
mod tests {
    use super::*;

    fn sample_body(identity: &Identity) -> CardBody {
        CardBody {
            card_id: identity.card_id(),
            name: "Scout".to_string(),
            about: "Finds things".to_string(),
            capabilities: vec![Capability::new("coding", "writes code")],
            protocols: vec![
                Protocol::Dm {
                    relays: "wss://relay.damus.io,wss://nos.lol".to_string(),
                },
                Protocol::Dvm {
                    relays: "wss://nos.lol".to_string(),
                    kinds: vec![5000, 5001],
                },
                Protocol::Custom {
                    id: "grpc".to_string(),
                    endpoint: "agent.example:443".to_string(),
                },
            ],
            color: Some("#ff8800".to_string()),
            avatar: None,
            banner: None,
        }
    }

    #[test]
    fn test_capability_survives_encode_decode() {
        let identity = Identity::generate();
        let body = sample_body(&identity);
        let event = build_service_card(&identity, &body).unwrap();
        let card = parse_service_card(&event).unwrap();
        assert_eq!(
            card.body.capabilities,
            vec![Capability::new("coding", "writes code")]
        );
        assert_eq!(card.body, body);
        assert_eq!(card.pubkey, identity.public_key_hex());
    }

    #[test]
    fn test_service_card_tag_layout() {
        let identity = Identity::generate();
        let event = build_service_card(&identity, &sample_body(&identity)).unwrap();
        let tags: Vec<Vec<String>> = event.tags.iter().map(|t| t.as_slice().to_vec()).collect();
        assert!(tags.contains(&vec!["L".to_string(), LABEL_NAMESPACE.to_string()]));
        assert!(tags.contains(&vec![
            "l".to_string(),
            LABEL_SERVICE_CARD.to_string(),
            LABEL_NAMESPACE.to_string()
        ]));
        assert!(tags.contains(&vec!["d".to_string(), identity.card_id()]));
        assert!(tags.contains(&vec!["k".to_string(), "5001".to_string()]));
        assert!(!tags.iter().any(|t| t[0] == "avatar"));
        assert_eq!(event.kind.as_u16(), KIND_SERVICE_CARD);

        let mirror: serde_json::Value = serde_json::from_str(&event.content).unwrap();
        assert_eq!(mirror["name"], "Scout");
    }

    #[test]
    fn test_missing_tags_fall_back_to_defaults() {
        let identity = Identity::generate();
        let event = EventBuilder::new(Kind::Custom(KIND_SERVICE_CARD), "")
            .tags([
                Tag::parse(["c", "research"]).unwrap(),
                Tag::parse(["x-unknown", "whatever"]).unwrap(),
            ])
            .sign_with_keys(identity.keys())
            .unwrap();
        let card = parse_service_card(&event).unwrap();
        assert_eq!(card.body.card_id, "default");
        assert_eq!(card.body.name, "Unknown Agent");
        assert_eq!(card.body.about, "");
        assert_eq!(card.body.capabilities, vec![Capability::new("research", "")]);
    }

    #[test]
    fn test_heartbeat_roundtrip() {
        let identity = Identity::generate();
        let event =
            build_heartbeat_at(&identity, &identity.card_id(), Status::Busy, 1_700_000_000)
                .unwrap();
        let hb = parse_heartbeat(&event).unwrap();
        assert_eq!(hb.status, Status::Busy);
        assert_eq!(hb.card_id, identity.card_id());
        assert_eq!(hb.created_at, 1_700_000_000);
        assert_eq!(hb.event_id, event.id.to_hex());
    }

    #[test]
    fn test_heartbeat_offline_alias() {
        let identity = Identity::generate();
        let event = EventBuilder::new(Kind::Custom(KIND_HEARTBEAT), "")
            .tags([
                Tag::parse(["d", "abc-v1"]).unwrap(),
                Tag::parse(["s", "Offline"]).unwrap(),
            ])
            .sign_with_keys(identity.keys())
            .unwrap();
        assert_eq!(parse_heartbeat(&event).unwrap().status, Status::Maintenance);
    }

    #[test]
    fn test_heartbeat_without_valid_status_is_malformed() {
        let identity = Identity::generate();
        for tags in [vec![], vec![Tag::parse(["s", "napping"]).unwrap()]] {
            let event = EventBuilder::new(Kind::Custom(KIND_HEARTBEAT), "")
                .tags(tags)
                .sign_with_keys(identity.keys())
                .unwrap();
            assert!(matches!(
                parse_heartbeat(&event),
                Err(WireError::Malformed(_))
            ));
        }
    }

    #[test]
    fn test_wrong_kind_rejected() {
        let identity = Identity::generate();
        let hb = build_heartbeat(&identity, "x", Status::Available).unwrap();
        assert!(matches!(
            parse_service_card(&hb),
            Err(WireError::WrongKind { expected: KIND_SERVICE_CARD, .. })
        ));
    }

    #[test]
    fn test_direct_message_roundtrip() {
        let alice = Identity::generate();
        let bob = Identity::generate();
        let event = build_direct_message(&alice, &bob.public_key(), "hello bob").unwrap();
        assert_eq!(event.kind.as_u16(), KIND_DIRECT_MESSAGE);
        assert_ne!(event.content, "hello bob");
        assert_eq!(recipients(&event), vec![bob.public_key_hex().to_string()]);
        assert_eq!(decrypt_direct_message(&bob, &event).unwrap(), "hello bob");
    }

    #[test]
    fn test_direct_message_wrong_recipient_fails() {
        let alice = Identity::generate();
        let bob = Identity::generate();
        let eve = Identity::generate();
        let event = build_direct_message(&alice, &bob.public_key(), "secret").unwrap();
        assert!(decrypt_direct_message(&eve, &event).is_err());
    }

    #[test]
    fn test_profile_picture() {
        let identity = Identity::generate();
        let event = EventBuilder::new(
            Kind::Custom(KIND_METADATA),
            r#"{"name":"x","picture":"https://img.example/a.png"}"#,
        )
        .sign_with_keys(identity.keys())
        .unwrap();
        assert_eq!(
            parse_profile_picture(&event).as_deref(),
            Some("https://img.example/a.png")
        );
    }
}
