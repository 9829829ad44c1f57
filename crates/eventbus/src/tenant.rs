//! Tenant-scoped publish/subscribe helpers (§ Tenant Isolation, C12).
//!
//! Engines know nothing about tenants — isolation is layered on top by
//! tagging outgoing events with a `tenant` metadata key and wrapping
//! tenant-scoped handlers so they silently skip events tagged for a
//! different tenant (or untagged entirely).

use eventbus_core::context::Context;
use eventbus_core::engine::Handler;
use eventbus_types::Event;

/// Metadata key carrying the tenant identifier on a tagged event.
pub const TENANT_METADATA_KEY: &str = "tenant";

/// Tag `event` with `tenant`, returning the modified event.
pub fn tag_tenant(event: Event, tenant: &str) -> Event {
    event.with_metadata(TENANT_METADATA_KEY, tenant)
}

/// Wrap `handler` so it only fires for events tagged with exactly `tenant`.
/// Events untagged or tagged for a different tenant are silently dropped —
/// this is what gives tenant A's subscription strict isolation from tenant
/// B's publishes even when both use the same topic.
pub fn scope_to_tenant(handler: Handler, tenant: String) -> Handler {
    std::sync::Arc::new(move |ctx: Context, event: Event| {
        let handler = handler.clone();
        let tenant = tenant.clone();
        Box::pin(async move {
            if event.metadata.get(TENANT_METADATA_KEY).map(String::as_str) != Some(tenant.as_str()) {
                return Ok(());
            }
            handler(ctx, event).await
        })
    })
}
