//! Provider payload variants and their normalization into
//! [`ProviderTransaction`].
//!
//! Each provider reports payments in its own JSON shape. The adapters decode
//! into these types at the boundary; everything past the adapter only sees
//! normalized transactions. The payload hash is computed over the re-encoded
//! provider object so that the same payment hashes identically whether it
//! arrived by webhook or by fetch.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use super::integration::{Provider, SyncCursor};
use super::transaction::{payload_hash, ProviderTransaction};
use crate::{LedgerLinkError, Result};

/// Fetch bounds handed to a provider adapter
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct FetchWindow {
    pub start: Option<DateTime<Utc>>,
    pub end: Option<DateTime<Utc>>,
    pub limit: u32,
}

impl FetchWindow {
    pub const fn open(limit: u32) -> Self {
        Self { start: None, end: None, limit }
    }

    pub const fn between(start: DateTime<Utc>, end: DateTime<Utc>, limit: u32) -> Self {
        Self { start: Some(start), end: Some(end), limit }
    }

    /// Whether `at` falls inside the window (inclusive bounds)
    pub fn contains(&self, at: DateTime<Utc>) -> bool {
        self.start.is_none_or(|start| at >= start) && self.end.is_none_or(|end| at <= end)
    }
}

/// One page of provider history, ordered by occurrence
#[derive(Debug, Clone, PartialEq, Eq, Default, Serialize, Deserialize)]
pub struct FetchPage {
    pub transactions: Vec<ProviderTransaction>,
    pub next_cursor: Option<SyncCursor>,
    pub has_more: bool,
}

// ============================================================================
// Square
// ============================================================================

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct SquareMoney {
    pub amount: i64,
    pub currency: String,
}

/// Square `Payment` object (subset)
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct SquarePayment {
    pub id: String,
    pub status: String,
    pub amount_money: SquareMoney,
    pub created_at: DateTime<Utc>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub reference_id: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub location_id: Option<String>,
}

impl SquarePayment {
    pub fn is_completed(&self) -> bool {
        self.status.eq_ignore_ascii_case("COMPLETED")
    }

    pub fn to_transaction(&self, business_id: &str) -> Result<ProviderTransaction> {
        Ok(ProviderTransaction {
            provider: Provider::Square,
            provider_txn_id: self.id.clone(),
            business_id: business_id.to_string(),
            amount_minor: self.amount_money.amount,
            currency: self.amount_money.currency.to_ascii_uppercase(),
            occurred_at: self.created_at,
            platform_reference: self.reference_id.clone(),
            payload_hash: payload_hash(&serde_json::to_vec(self)?),
        })
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct SquareWebhookObject {
    #[serde(default)]
    pub payment: Option<SquarePayment>,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct SquareWebhookData {
    #[serde(rename = "type")]
    pub object_type: String,
    pub id: String,
    pub object: SquareWebhookObject,
}

/// Square notification envelope
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct SquareWebhook {
    #[serde(default)]
    pub merchant_id: Option<String>,
    #[serde(rename = "type")]
    pub event_type: String,
    pub event_id: String,
    pub created_at: DateTime<Utc>,
    pub data: SquareWebhookData,
}

// ============================================================================
// Shopify
// ============================================================================

/// Shopify `Order` object (subset)
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ShopifyOrder {
    pub id: u64,
    pub created_at: DateTime<Utc>,
    /// Decimal string in major units, e.g. `"150.00"`
    pub total_price: String,
    pub currency: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub source_identifier: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub financial_status: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub cancelled_at: Option<DateTime<Utc>>,
}

impl ShopifyOrder {
    /// Paid and not cancelled
    pub fn is_settled(&self) -> bool {
        self.cancelled_at.is_none()
            && self.financial_status.as_deref().is_none_or(|status| status == "paid")
    }

    pub fn to_transaction(&self, business_id: &str) -> Result<ProviderTransaction> {
        Ok(ProviderTransaction {
            provider: Provider::Shopify,
            provider_txn_id: self.id.to_string(),
            business_id: business_id.to_string(),
            amount_minor: parse_minor_units(&self.total_price, &self.currency)?,
            currency: self.currency.to_ascii_uppercase(),
            occurred_at: self.created_at,
            platform_reference: self.source_identifier.clone(),
            payload_hash: payload_hash(&serde_json::to_vec(self)?),
        })
    }
}

/// Shopify delivers the bare order; the event id travels in a header
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ShopifyWebhook {
    pub webhook_id: String,
    pub order: ShopifyOrder,
}

// ============================================================================
// Zettle
// ============================================================================

/// Zettle purchase (subset)
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ZettlePurchase {
    #[serde(rename = "purchaseUUID1")]
    pub purchase_uuid: String,
    /// Minor units
    pub amount: i64,
    pub currency: String,
    pub timestamp: DateTime<Utc>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub global_purchase_number: Option<u64>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub external_reference: Option<String>,
}

impl ZettlePurchase {
    pub fn to_transaction(&self, business_id: &str) -> Result<ProviderTransaction> {
        Ok(ProviderTransaction {
            provider: Provider::Zettle,
            provider_txn_id: self.purchase_uuid.clone(),
            business_id: business_id.to_string(),
            amount_minor: self.amount,
            currency: self.currency.to_ascii_uppercase(),
            occurred_at: self.timestamp,
            platform_reference: self.external_reference.clone(),
            payload_hash: payload_hash(&serde_json::to_vec(self)?),
        })
    }
}

/// Zettle push envelope; `payload` is a JSON document encoded as a string
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ZettleWebhook {
    pub organization_uuid: String,
    pub message_uuid: String,
    pub event_name: String,
    pub payload: String,
    pub timestamp: DateTime<Utc>,
}

impl ZettleWebhook {
    pub const PURCHASE_CREATED: &'static str = "PurchaseCreated";

    /// Decoded purchase for `PurchaseCreated` events
    pub fn purchase(&self) -> Result<Option<ZettlePurchase>> {
        if self.event_name != Self::PURCHASE_CREATED {
            return Ok(None);
        }
        Ok(Some(serde_json::from_str(&self.payload)?))
    }
}

// ============================================================================
// Tagged variant
// ============================================================================

/// Decoded webhook, one variant per provider
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "provider", rename_all = "snake_case")]
pub enum ProviderWebhook {
    Square(SquareWebhook),
    Shopify(ShopifyWebhook),
    Zettle(ZettleWebhook),
}

impl ProviderWebhook {
    /// Decode a raw webhook body for `provider`
    ///
    /// `delivery_id` is the provider's delivery header; Shopify requires it
    /// because its body carries no event id.
    pub fn decode(provider: Provider, raw: &[u8], delivery_id: Option<&str>) -> Result<Self> {
        match provider {
            Provider::Square => Ok(Self::Square(serde_json::from_slice(raw)?)),
            Provider::Shopify => {
                let webhook_id = delivery_id
                    .filter(|id| !id.trim().is_empty())
                    .ok_or_else(|| LedgerLinkError::validation("missing Shopify webhook id"))?;
                Ok(Self::Shopify(ShopifyWebhook {
                    webhook_id: webhook_id.to_string(),
                    order: serde_json::from_slice(raw)?,
                }))
            }
            Provider::Zettle => {
                let webhook: ZettleWebhook = serde_json::from_slice(raw)?;
                webhook.purchase()?;
                Ok(Self::Zettle(webhook))
            }
        }
    }

    pub const fn provider(&self) -> Provider {
        match self {
            Self::Square(_) => Provider::Square,
            Self::Shopify(_) => Provider::Shopify,
            Self::Zettle(_) => Provider::Zettle,
        }
    }

    /// Provider-assigned idempotency key of the delivery
    pub fn event_id(&self) -> &str {
        match self {
            Self::Square(event) => &event.event_id,
            Self::Shopify(event) => &event.webhook_id,
            Self::Zettle(event) => &event.message_uuid,
        }
    }

    /// Settled transactions carried by the event
    ///
    /// Events about other objects, or payments that have not completed,
    /// normalize to nothing.
    pub fn normalize(&self, business_id: &str) -> Result<Vec<ProviderTransaction>> {
        match self {
            Self::Square(event) => event
                .data
                .object
                .payment
                .iter()
                .filter(|payment| payment.is_completed())
                .map(|payment| payment.to_transaction(business_id))
                .collect(),
            Self::Shopify(event) => {
                if event.order.is_settled() {
                    Ok(vec![event.order.to_transaction(business_id)?])
                } else {
                    Ok(Vec::new())
                }
            }
            Self::Zettle(event) => event
                .purchase()?
                .map(|purchase| purchase.to_transaction(business_id))
                .into_iter()
                .collect(),
        }
    }
}

/// Number of minor-unit digits for an ISO 4217 currency
pub fn currency_exponent(currency: &str) -> u32 {
    match currency.to_ascii_uppercase().as_str() {
        "JPY" | "KRW" | "ISK" | "CLP" | "VND" | "HUF" => 0,
        "BHD" | "KWD" | "OMR" | "JOD" | "TND" => 3,
        _ => 2,
    }
}

/// Parse a decimal major-unit string (`"150.00"`) into minor units
pub fn parse_minor_units(value: &str, currency: &str) -> Result<i64> {
    let exponent = currency_exponent(currency);
    let invalid = || LedgerLinkError::validation(format!("invalid {currency} amount '{value}'"));

    let trimmed = value.trim();
    let (negative, digits) = match trimmed.strip_prefix('-') {
        Some(rest) => (true, rest),
        None => (false, trimmed),
    };
    let (whole, fraction) = digits.split_once('.').unwrap_or((digits, ""));
    if whole.is_empty() || !whole.chars().all(|c| c.is_ascii_digit()) {
        return Err(invalid());
    }
    if !fraction.chars().all(|c| c.is_ascii_digit()) {
        return Err(invalid());
    }
    let significant = fraction.trim_end_matches('0');
    if significant.len() > exponent as usize {
        return Err(invalid());
    }

    let scale = 10_i64.pow(exponent);
    let whole: i64 = whole.parse().map_err(|_| invalid())?;
    let mut fraction_value: i64 = 0;
    for (position, digit) in significant.chars().enumerate() {
        let digit = i64::from(digit.to_digit(10).ok_or_else(invalid)?);
        let power = exponent - 1 - u32::try_from(position).map_err(|_| invalid())?;
        fraction_value += digit * 10_i64.pow(power);
    }
    let amount = whole
        .checked_mul(scale)
        .and_then(|w| w.checked_add(fraction_value))
        .ok_or_else(invalid)?;
    Ok(if negative { -amount } else { amount })
}
