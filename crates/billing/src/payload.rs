//! Webhook payload shapes
//!
//! Subscription lifecycle payloads as Lemon Squeezy sends them. The
//! provider serializes ids and foreign keys inconsistently (sometimes
//! JSON strings, sometimes numbers), so those fields deserialize through
//! a tolerant visitor.

use serde::de::{self, Deserializer, Visitor};
use serde::Deserialize;
use time::OffsetDateTime;

#[derive(Debug, Clone, Deserialize)]
pub struct WebhookPayload {
    pub meta: Meta,
    pub data: EventData,
}

#[derive(Debug, Clone, Deserialize)]
pub struct Meta {
    pub event_name: String,
    #[serde(default)]
    pub custom_data: Option<CustomData>,
}

/// Passthrough values set at checkout creation. `user_id` is how a
/// delivery gets attributed back to a local account.
#[derive(Debug, Clone, Deserialize)]
pub struct CustomData {
    #[serde(default, deserialize_with = "opt_string_or_number")]
    pub user_id: Option<String>,
}

#[derive(Debug, Clone, Deserialize)]
pub struct EventData {
    /// The provider's subscription id; the upsert key for local rows.
    #[serde(deserialize_with = "string_or_number")]
    pub id: String,
    pub attributes: SubscriptionAttributes,
}

#[derive(Debug, Clone, Deserialize)]
pub struct SubscriptionAttributes {
    #[serde(deserialize_with = "string_or_number")]
    pub variant_id: String,
    #[serde(deserialize_with = "string_or_number")]
    pub customer_id: String,
    #[serde(deserialize_with = "string_or_number")]
    pub order_id: String,
    pub status: String,
    #[serde(default)]
    pub status_formatted: Option<String>,
    #[serde(default, with = "time::serde::rfc3339::option")]
    pub renews_at: Option<OffsetDateTime>,
    #[serde(default, with = "time::serde::rfc3339::option")]
    pub ends_at: Option<OffsetDateTime>,
    #[serde(default, with = "time::serde::rfc3339::option")]
    pub trial_ends_at: Option<OffsetDateTime>,
    #[serde(default)]
    pub user_email: Option<String>,
    #[serde(default)]
    pub first_subscription_item: Option<FirstSubscriptionItem>,
    #[serde(default)]
    pub urls: Option<SubscriptionUrls>,
}

#[derive(Debug, Clone, Deserialize)]
pub struct FirstSubscriptionItem {
    #[serde(deserialize_with = "string_or_number")]
    pub price_id: String,
    #[serde(default)]
    pub is_usage_based: bool,
    /// Some payload versions inline the price here; when present it wins
    /// over an API lookup.
    #[serde(default, deserialize_with = "opt_string_or_number")]
    pub price: Option<String>,
}

#[derive(Debug, Clone, Deserialize)]
pub struct SubscriptionUrls {
    #[serde(default)]
    pub update_payment_method: Option<String>,
    #[serde(default)]
    pub customer_portal: Option<String>,
}

struct StringOrNumber;

impl Visitor<'_> for StringOrNumber {
    type Value = String;

    fn expecting(&self, f: &mut std::fmt::Formatter) -> std::fmt::Result {
        f.write_str("a string or a number")
    }

    fn visit_str<E: de::Error>(self, v: &str) -> Result<String, E> {
        Ok(v.to_string())
    }

    fn visit_u64<E: de::Error>(self, v: u64) -> Result<String, E> {
        Ok(v.to_string())
    }

    fn visit_i64<E: de::Error>(self, v: i64) -> Result<String, E> {
        Ok(v.to_string())
    }
}

fn string_or_number<'de, D: Deserializer<'de>>(deserializer: D) -> Result<String, D::Error> {
    deserializer.deserialize_any(StringOrNumber)
}

fn opt_string_or_number<'de, D: Deserializer<'de>>(
    deserializer: D,
) -> Result<Option<String>, D::Error> {
    struct OptVisitor;

    impl<'de> Visitor<'de> for OptVisitor {
        type Value = Option<String>;

        fn expecting(&self, f: &mut std::fmt::Formatter) -> std::fmt::Result {
            f.write_str("a string, a number, or null")
        }

        fn visit_none<E: de::Error>(self) -> Result<Self::Value, E> {
            Ok(None)
        }

        fn visit_unit<E: de::Error>(self) -> Result<Self::Value, E> {
            Ok(None)
        }

        fn visit_some<D: Deserializer<'de>>(self, d: D) -> Result<Self::Value, D::Error> {
            d.deserialize_any(StringOrNumber).map(Some)
        }
    }

    deserializer.deserialize_option(OptVisitor)
}

#[cfg(test)]
#[allow(clippy::unwrap_used)]
mod tests {
    use super::*;

    #[test]
    fn test_parse_string_ids() {
        let json = r#"{
            "meta": {
                "event_name": "subscription_created",
                "custom_data": { "user_id": "7f8d2f0a-3a6e-4a2b-9f1c-0a1b2c3d4e5f" }
            },
            "data": {
                "id": "sub_123",
                "attributes": {
                    "variant_id": "v1",
                    "customer_id": "c1",
                    "order_id": "o1",
                    "status": "active",
                    "renews_at": "2026-09-01T00:00:00Z",
                    "ends_at": null,
                    "trial_ends_at": null
                }
            }
        }"#;

        let payload: WebhookPayload = serde_json::from_str(json).unwrap();
        assert_eq!(payload.meta.event_name, "subscription_created");
        assert_eq!(payload.data.id, "sub_123");
        assert_eq!(payload.data.attributes.variant_id, "v1");
        assert_eq!(payload.data.attributes.status, "active");
        assert!(payload.data.attributes.renews_at.is_some());
        assert!(payload.data.attributes.ends_at.is_none());
        assert!(payload.data.attributes.first_subscription_item.is_none());
    }

    #[test]
    fn test_parse_numeric_ids() {
        let json = r#"{
            "meta": {
                "event_name": "subscription_updated",
                "custom_data": { "user_id": "7f8d2f0a-3a6e-4a2b-9f1c-0a1b2c3d4e5f" }
            },
            "data": {
                "id": 48201,
                "attributes": {
                    "variant_id": 11111,
                    "customer_id": 22222,
                    "order_id": 33333,
                    "status": "on_trial",
                    "status_formatted": "On Trial",
                    "trial_ends_at": "2026-09-07T12:00:00Z",
                    "first_subscription_item": {
                        "price_id": 44444,
                        "is_usage_based": false
                    },
                    "urls": {
                        "update_payment_method": "https://example.lemonsqueezy.com/update",
                        "customer_portal": "https://example.lemonsqueezy.com/portal"
                    }
                }
            }
        }"#;

        let payload: WebhookPayload = serde_json::from_str(json).unwrap();
        assert_eq!(payload.data.id, "48201");
        assert_eq!(payload.data.attributes.variant_id, "11111");
        let item = payload.data.attributes.first_subscription_item.unwrap();
        assert_eq!(item.price_id, "44444");
        assert!(item.price.is_none());
        let urls = payload.data.attributes.urls.unwrap();
        assert_eq!(
            urls.customer_portal.as_deref(),
            Some("https://example.lemonsqueezy.com/portal")
        );
    }

    #[test]
    fn test_parse_missing_custom_data() {
        let json = r#"{
            "meta": { "event_name": "subscription_expired" },
            "data": {
                "id": "sub_9",
                "attributes": {
                    "variant_id": "v1",
                    "customer_id": "c1",
                    "order_id": "o1",
                    "status": "expired"
                }
            }
        }"#;

        let payload: WebhookPayload = serde_json::from_str(json).unwrap();
        assert!(payload.meta.custom_data.is_none());
        assert_eq!(payload.data.attributes.status, "expired");
    }
}
