//! Static cost table and token estimation.
//!
//! Rates are blended (input and output averaged) US dollars per one million
//! tokens. Lookups match a case-insensitive substring of the model name,
//! first match wins, so more specific names are listed before their
//! prefixes (`gpt-4o-mini` before `gpt-4o` before `gpt-4`).

use rust_decimal::{Decimal, dec, prelude::ToPrimitive};

use crate::models::VendorKind;

/// Rate applied when no table entry matches the model name.
pub const DEFAULT_RATE_PER_MILLION: Decimal = dec!(5.00);

/// Characters per token used when a vendor does not report usage.
pub const CHARS_PER_TOKEN: usize = 4;

struct RateEntry {
    vendor: VendorKind,
    pattern: &'static str,
    per_million: Decimal,
}

const fn rate(vendor: VendorKind, pattern: &'static str, per_million: Decimal) -> RateEntry {
    RateEntry {
        vendor,
        pattern,
        per_million,
    }
}

static RATE_TABLE: &[RateEntry] = &[
    rate(VendorKind::OpenAi, "text-embedding-3-small", dec!(0.02)),
    rate(VendorKind::OpenAi, "text-embedding-3-large", dec!(0.13)),
    rate(VendorKind::OpenAi, "gpt-4o-mini", dec!(0.60)),
    rate(VendorKind::OpenAi, "gpt-4o", dec!(5.00)),
    rate(VendorKind::OpenAi, "gpt-4.1-nano", dec!(0.25)),
    rate(VendorKind::OpenAi, "gpt-4.1-mini", dec!(0.80)),
    rate(VendorKind::OpenAi, "gpt-4.1", dec!(4.00)),
    rate(VendorKind::OpenAi, "gpt-4-turbo", dec!(20.00)),
    rate(VendorKind::OpenAi, "gpt-4", dec!(45.00)),
    rate(VendorKind::OpenAi, "gpt-3.5", dec!(1.00)),
    rate(VendorKind::OpenAi, "o1-mini", dec!(6.00)),
    rate(VendorKind::OpenAi, "o3-mini", dec!(2.50)),
    rate(VendorKind::OpenAi, "o1", dec!(30.00)),
    rate(VendorKind::Anthropic, "haiku", dec!(2.00)),
    rate(VendorKind::Anthropic, "sonnet", dec!(9.00)),
    rate(VendorKind::Anthropic, "opus", dec!(45.00)),
    rate(VendorKind::Gemini, "text-embedding", dec!(0.02)),
    rate(VendorKind::Gemini, "flash-lite", dec!(0.20)),
    rate(VendorKind::Gemini, "flash", dec!(0.40)),
    rate(VendorKind::Gemini, "pro", dec!(6.00)),
];

/// Blended dollars per million tokens for a vendor/model pair.
///
/// Never fails: unknown models get [`DEFAULT_RATE_PER_MILLION`].
pub fn cost_per_million_tokens(vendor: VendorKind, model: &str) -> Decimal {
    let model = model.to_ascii_lowercase();
    RATE_TABLE
        .iter()
        .find(|entry| entry.vendor == vendor && model.contains(entry.pattern))
        .map(|entry| entry.per_million)
        .unwrap_or(DEFAULT_RATE_PER_MILLION)
}

/// Estimated cost of `total_tokens` in whole cents, rounded up so that any
/// billable attempt counts against daily cost quotas.
pub fn estimate_cost_cents(vendor: VendorKind, model: &str, total_tokens: u32) -> i64 {
    if total_tokens == 0 {
        return 0;
    }
    // dollars = tokens * rate / 1e6, cents = dollars * 100
    let cents = Decimal::from(total_tokens) * cost_per_million_tokens(vendor, model)
        / Decimal::from(10_000);
    cents.ceil().to_i64().unwrap_or(i64::MAX)
}

/// Deterministic token estimate: `ceil(chars / 4)`.
pub fn estimate_tokens(chars: usize) -> u32 {
    u32::try_from(chars.div_ceil(CHARS_PER_TOKEN)).unwrap_or(u32::MAX)
}
