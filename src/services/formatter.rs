// src/services/formatter.rs
//
// Pure rendering of a gated deal into a Telegram-HTML message. No business
// logic here; the gate has already decided this deal notifies.

use crate::db::models::Deal;
use crate::services::scorer::Scored;

const MAX_DESCRIPTION_CHARS: usize = 200;

pub fn deal_message(
    deal: &Deal,
    temperature: f64,
    scored: &Scored,
    hours_since_published: f64,
) -> String {
    let mut lines = Vec::new();

    lines.push(format!(
        "{} <b>{}</b>",
        fire_prefix(scored.rating),
        escape_html(&deal.title)
    ));
    lines.push(String::new());

    let mut stats = format!(
        "🌡 {}° · ⏱ {}",
        format_temperature(temperature),
        format_age(hours_since_published)
    );
    if let Some(merchant) = &deal.merchant {
        stats.push_str(&format!(" · 🏬 {}", escape_html(merchant)));
    }
    lines.push(stats);

    if let Some(price) = deal.price {
        let mut price_line = format!("💰 {}", format_price(price));
        if let Some(discount) = &deal.discount {
            price_line.push_str(&format!(" ({})", escape_html(discount)));
        }
        lines.push(price_line);
    }

    if let Some(coupon) = &deal.coupon {
        lines.push(format!("🎟 Cupón: <code>{}</code>", escape_html(coupon)));
    }

    if let Some(description) = &deal.description {
        let trimmed = description.trim();
        if !trimmed.is_empty() {
            lines.push(String::new());
            lines.push(escape_html(&truncate(trimmed, MAX_DESCRIPTION_CHARS)));
        }
    }

    lines.push(String::new());
    lines.push(format!("🔗 {}", deal.url));

    lines.join("\n")
}

fn fire_prefix(rating: i32) -> String {
    "🔥".repeat(rating.clamp(1, 4) as usize)
}

fn format_temperature(temperature: f64) -> String {
    if temperature.fract().abs() < 0.05 {
        format!("{:.0}", temperature)
    } else {
        format!("{:.1}", temperature)
    }
}

fn format_age(hours: f64) -> String {
    let total_minutes = (hours * 60.0).round().max(0.0) as u64;
    if total_minutes < 60 {
        format!("{total_minutes}m")
    } else {
        format!("{}h {}m", total_minutes / 60, total_minutes % 60)
    }
}

fn format_price(price: f64) -> String {
    if price.fract().abs() < 0.005 {
        format!("${:.0}", price)
    } else {
        format!("${:.2}", price)
    }
}

/// Cut on a char boundary and append an ellipsis.
fn truncate(text: &str, max_chars: usize) -> String {
    if text.chars().count() <= max_chars {
        return text.to_string();
    }
    let cut: String = text.chars().take(max_chars).collect();
    format!("{}…", cut.trim_end())
}

fn escape_html(text: &str) -> String {
    text.replace('&', "&amp;")
        .replace('<', "&lt;")
        .replace('>', "&gt;")
}
