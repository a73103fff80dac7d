//! Minijinja rendering of slot alerts.
//!
//! The alert is a MarkdownV2 message. Every interpolated value passes through
//! one of the escaping filters registered in [`AlertRenderer::build_env`], so
//! upstream text can never break the markup.

use minijinja::Value;
use serde::Serialize;
use vaccibot_core::ServiceSlot;

use crate::telegram::{escape_markdown_v2, escape_markdown_v2_url};
use crate::traits::NotifyError;

/// Message layout for a slot with free tickets.
pub const ALERT_TEMPLATE: &str = r"\#{{ region | md_tag }}
🔎 \#{{ tag | md_tag }}

🏥 {{ facility | md }}
🗺 {{ address | md }}
☎️ {{ phone | md }}
📧 {{ email | md }}

[Записаться {{ slot | md }}]({{ link | md_url }})
Всего *{{ free_tickets | md }}* 🎫
Доступных *{{ free_participants | md }}* 🎫";

/// Values exposed to the alert template.
#[derive(Debug, Clone, Serialize)]
pub struct AlertContext {
    pub region: String,
    pub tag: String,
    pub facility: String,
    pub address: String,
    pub phone: String,
    pub email: String,
    pub slot: String,
    pub link: String,
    pub free_tickets: i64,
    pub free_participants: i64,
}

impl AlertContext {
    pub fn from_slot(slot: &ServiceSlot, link: String) -> Self {
        let facility = &slot.facility;
        Self {
            region: facility.region.name.clone(),
            tag: slot.tag(),
            facility: facility.lpu_short_name.clone(),
            address: facility.address.clone().unwrap_or_default(),
            phone: facility.phone.clone().unwrap_or_default(),
            email: facility.email.clone().unwrap_or_default(),
            slot: slot.name.clone(),
            link,
            free_tickets: slot.count_free_ticket,
            free_participants: slot.count_free_participant,
        }
    }
}

/// Renders alert messages and booking deep links.
#[derive(Debug, Clone)]
pub struct AlertRenderer {
    link_base: url::Url,
}

impl AlertRenderer {
    /// `link_base` is the public booking page the deep link points into.
    pub fn new(link_base: &str) -> Result<Self, NotifyError> {
        let link_base = url::Url::parse(link_base)
            .map_err(|e| NotifyError::Config(format!("invalid link base '{link_base}': {e}")))?;
        Ok(Self { link_base })
    }

    /// Build a configured minijinja environment with the escaping filters.
    fn build_env() -> minijinja::Environment<'static> {
        let mut env = minijinja::Environment::new();
        env.add_filter("md", md_filter);
        env.add_filter("md_tag", md_tag_filter);
        env.add_filter("md_url", md_url_filter);
        env
    }

    /// Link that opens the booking page preselected on this slot.
    ///
    /// The page reads its selection from a URL fragment holding
    /// `[{"district":R},{"lpu":F},{"speciality":S}]` with every id as a string.
    pub fn deep_link(&self, slot: &ServiceSlot) -> String {
        let selection = serde_json::json!([
            { "district": slot.facility.region.id },
            { "lpu": slot.facility.id.to_string() },
            { "speciality": slot.id },
        ]);
        let mut link = self.link_base.clone();
        link.set_fragment(Some(&selection.to_string()));
        link.to_string()
    }

    /// Render the alert for `slot`.
    pub fn render_alert(&self, slot: &ServiceSlot) -> Result<String, NotifyError> {
        let ctx = AlertContext::from_slot(slot, self.deep_link(slot));
        self.render(ALERT_TEMPLATE, &ctx)
    }

    /// Render a template string with the given context.
    ///
    /// # Errors
    ///
    /// Returns [`NotifyError::Template`] if the template is invalid or
    /// rendering fails.
    pub fn render(&self, template_str: &str, ctx: &AlertContext) -> Result<String, NotifyError> {
        let env = Self::build_env();
        env.render_str(template_str, ctx)
            .map_err(|e| NotifyError::Template(e.to_string()))
    }
}

fn md_filter(value: Value) -> String {
    escape_markdown_v2(&value.to_string())
}

/// Hashtags end at whitespace, so spaces become underscores.
fn md_tag_filter(value: Value) -> String {
    let tag: String = value
        .to_string()
        .chars()
        .map(|c| if c.is_whitespace() { '_' } else { c })
        .collect();
    escape_markdown_v2(&tag)
}

fn md_url_filter(value: Value) -> String {
    escape_markdown_v2_url(&value.to_string())
}
