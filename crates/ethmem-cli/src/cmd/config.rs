//! API key and model status commands.

use super::Session;
use crate::ui;
use ethmem_wire::bus::{ActiveModel, ApiKeyCheck, ApiStatus};
use ethmem_wire::BusRequest;

pub async fn status(session: &Session) -> anyhow::Result<()> {
    let api: ApiStatus = session.call(BusRequest::GetApiStatus).await?;
    let model: ActiveModel = session.call(BusRequest::GetActiveModel).await?;
    if session.json {
        return session.print_json(&serde_json::json!({ "api": api, "model": model }));
    }
    ui::section("Remote");
    print_api(&api);
    ui::blank();
    ui::section("Local model");
    match &model.active_model {
        Some(id) => ui::kv("Model", id),
        None => ui::kv_warn("Model", "none configured"),
    }
    let state = model.state.to_string();
    if model.ready {
        ui::kv_ok("State", &state);
    } else {
        ui::kv_warn("State", &state);
        ui::hint("extraction and ranking fall back to rules while the model is not loaded");
    }
    Ok(())
}

pub async fn api_status(session: &Session) -> anyhow::Result<()> {
    let api: ApiStatus = session.call(BusRequest::GetApiStatus).await?;
    if session.json {
        return session.print_json(&api);
    }
    print_api(&api);
    Ok(())
}

fn print_api(api: &ApiStatus) {
    if api.configured {
        ui::kv_ok("API key", "configured");
    } else {
        ui::kv_warn("API key", "not set");
    }
    ui::kv("Model", &api.model);
}

pub async fn set_key(session: &Session, key: String) -> anyhow::Result<()> {
    let api: ApiStatus = session.call(BusRequest::SaveApiKey { api_key: key }).await?;
    if session.json {
        return session.print_json(&api);
    }
    ui::success(&format!("API key saved (model {})", api.model));
    ui::hint("run `ethmem test-key` to check it against the endpoint");
    Ok(())
}

pub async fn test_key(session: &Session, key: Option<String>) -> anyhow::Result<()> {
    let check: ApiKeyCheck = session.call(BusRequest::TestApiKey { api_key: key }).await?;
    if session.json {
        return session.print_json(&check);
    }
    if check.valid {
        ui::success(&format!("API key accepted, {} models visible", check.models.len()));
    } else {
        ui::error_with_fix(
            &format!(
                "API key rejected: {}",
                check.error.as_deref().unwrap_or("unknown error")
            ),
            "ethmem set-key <key>",
        );
    }
    Ok(())
}
