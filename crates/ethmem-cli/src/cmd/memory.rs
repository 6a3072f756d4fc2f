//! Memory commands: extraction, listing, ranking and injection previews.

use super::Session;
use crate::table::Table;
use crate::ui;
use anyhow::bail;
use ethmem_intercept::{
    InjectionController, NetworkInterceptor, OutgoingRequest, Primitive, SmartInjector,
};
use ethmem_types::memory::{Memory, MemoryId, MemoryStats, MemoryStatus};
use ethmem_wire::bus::{ExtractOutcome, MemoryList, SmartOutcome};
use ethmem_wire::{BusRequest, PageBridge};
use serde_json::{json, Value};
use std::io::{self, BufRead, Write};
use std::sync::Arc;
use std::time::Duration;

fn short_date(timestamp: i64) -> String {
    chrono::DateTime::<chrono::Utc>::from_timestamp_millis(timestamp)
        .map(|d| d.format("%Y-%m-%d").to_string())
        .unwrap_or_default()
}

fn print_memories(memories: &[Memory]) {
    let mut table = Table::new(&["Id", "Category", "Entity", "Conf", "Status", "Model", "Date"]);
    for m in memories {
        table.add_row(&[
            m.id.to_string(),
            m.category.to_string(),
            m.entity.clone(),
            format!("{:.2}", m.metadata.confidence),
            m.status.to_string(),
            m.metadata.model_used.clone(),
            short_date(m.timestamp),
        ]);
    }
    table.print();
}

fn print_outcome(outcome: &ExtractOutcome) {
    match &outcome.memory {
        None => ui::notice("No memory found in that text"),
        Some(m) if outcome.duplicate => {
            ui::notice(&format!("Already known: {}: {}", m.category, m.entity))
        }
        Some(m) => {
            ui::success(&format!("Stored {}", m.id));
            ui::kv("Category", m.category.as_str());
            ui::kv("Entity", &m.entity);
            ui::kv("Description", &m.description);
            ui::kv("Confidence", &format!("{:.2}", m.metadata.confidence));
            ui::kv("Model", &m.metadata.model_used);
        }
    }
}

pub async fn extract(
    session: &Session,
    text: String,
    platform: Option<String>,
) -> anyhow::Result<()> {
    let outcome: ExtractOutcome = session
        .call(BusRequest::ExtractMemory { text, platform })
        .await?;
    if session.json {
        return session.print_json(&outcome);
    }
    print_outcome(&outcome);
    Ok(())
}

pub async fn add(
    session: &Session,
    category: String,
    entity: String,
    description: Option<String>,
    platform: Option<String>,
) -> anyhow::Result<()> {
    let outcome: ExtractOutcome = session
        .call(BusRequest::AddManualMemory {
            category,
            entity,
            description,
            platform,
        })
        .await?;
    if session.json {
        return session.print_json(&outcome);
    }
    print_outcome(&outcome);
    Ok(())
}

pub async fn list(session: &Session, category: Option<String>) -> anyhow::Result<()> {
    let MemoryList { mut memories } = session.call(BusRequest::GetMemories).await?;
    if let Some(category) = category {
        let wanted = category.trim().to_lowercase();
        memories.retain(|m| m.category.as_str() == wanted);
    }
    if session.json {
        return session.print_json(&memories);
    }
    if memories.is_empty() {
        ui::notice("No memories stored");
        return Ok(());
    }
    print_memories(&memories);
    Ok(())
}

pub async fn stats(session: &Session) -> anyhow::Result<()> {
    let stats: MemoryStats = session.call(BusRequest::GetMemoryStats).await?;
    if session.json {
        return session.print_json(&stats);
    }
    ui::section("Memories");
    ui::kv("Total", &stats.total.to_string());
    for (category, count) in &stats.by_category {
        ui::kv(category, &count.to_string());
    }
    ui::blank();
    ui::section("Status");
    for (status, count) in &stats.by_status {
        ui::kv(status, &count.to_string());
    }
    if !stats.recent.is_empty() {
        ui::blank();
        ui::section("Recent");
        print_memories(&stats.recent);
    }
    Ok(())
}

pub async fn delete(session: &Session, id: String) -> anyhow::Result<()> {
    let reply: Value = session
        .call(BusRequest::DeleteMemory {
            id: MemoryId(id.clone()),
        })
        .await?;
    if session.json {
        return session.print_json(&reply);
    }
    if reply["deleted"].as_bool().unwrap_or(false) {
        ui::success(&format!("Deleted {id}"));
    } else {
        ui::notice(&format!("No memory with id {id}"));
    }
    Ok(())
}

fn confirm(prompt: &str) -> io::Result<bool> {
    print!("  {prompt} [y/N] ");
    io::stdout().flush()?;
    let mut answer = String::new();
    io::stdin().lock().read_line(&mut answer)?;
    Ok(matches!(answer.trim(), "y" | "Y" | "yes"))
}

pub async fn clear(session: &Session, yes: bool) -> anyhow::Result<()> {
    if !yes && !confirm("Delete every stored memory?")? {
        ui::notice("Nothing deleted");
        return Ok(());
    }
    let reply: Value = session.call(BusRequest::ClearAllMemories).await?;
    if session.json {
        return session.print_json(&reply);
    }
    ui::success(&format!(
        "Cleared {} memories",
        reply["cleared"].as_u64().unwrap_or(0)
    ));
    Ok(())
}

pub async fn promote(session: &Session, id: String, status: String) -> anyhow::Result<()> {
    let Some(status) = MemoryStatus::parse(status.trim()) else {
        bail!("unknown status {status:?}; expected local, synced or on-chain");
    };
    let memory: Memory = session
        .call(BusRequest::UpdateMemoryStatus {
            id: MemoryId(id),
            status,
        })
        .await?;
    if session.json {
        return session.print_json(&memory);
    }
    ui::success(&format!("{} is now {}", memory.id, memory.status));
    Ok(())
}

pub async fn rank(session: &Session, message: String, max: usize) -> anyhow::Result<()> {
    let MemoryList { memories } = session
        .call(BusRequest::GetRankedMemories {
            user_message: message,
            max_memories: max,
        })
        .await?;
    if session.json {
        return session.print_json(&memories);
    }
    if memories.is_empty() {
        ui::notice("Nothing relevant");
        return Ok(());
    }
    print_memories(&memories);
    Ok(())
}

pub async fn smart(
    session: &Session,
    message: String,
    platform: Option<String>,
) -> anyhow::Result<()> {
    let outcome: SmartOutcome = session
        .call(BusRequest::ProcessMessageSmart { message, platform })
        .await?;
    if session.json {
        return session.print_json(&outcome);
    }
    if let Some(m) = &outcome.new_memory {
        ui::success(&format!("New memory: {}: {}", m.category, m.entity));
    }
    if outcome.relevant_memories.is_empty() {
        ui::notice("No relevant memories");
        return Ok(());
    }
    print_memories(&outcome.relevant_memories);
    ui::kv("Injection", outcome.injection_text.trim());
    Ok(())
}

/// Scheme and host of `url`, used as the page origin.
fn origin_of(url: &str) -> String {
    url.splitn(4, '/').take(3).collect::<Vec<_>>().join("/")
}

pub async fn inject(
    session: &Session,
    message: String,
    url: String,
    body: Option<String>,
) -> anyhow::Result<()> {
    let controller = Arc::new(InjectionController::new());
    let interceptor = NetworkInterceptor::new(controller.clone(), None);
    let Some((adapter, _)) = interceptor.classify(&url) else {
        bail!("no platform adapter matches {url}");
    };
    let platform = adapter.platform().as_str().to_string();

    let client = PageBridge::connect(
        &origin_of(&url),
        session.router.clone(),
        Duration::from_secs(300),
    );
    let injector = SmartInjector::new(Arc::new(client), controller, Some(platform));
    let staged = injector.before_send(&message).await;

    let body = body.unwrap_or_else(|| {
        json!({"messages": [{"role": "user", "content": message}]}).to_string()
    });
    let out = interceptor
        .on_outgoing(OutgoingRequest::post(Primitive::Fetch, url, body))
        .await;

    if session.json {
        return session.print_json(&json!({
            "staged": staged,
            "injected": out.injected,
            "body": out.request.body,
        }));
    }
    match (&staged, out.injected) {
        (None, _) => ui::notice("No relevant memories; body left unchanged"),
        (Some(_), false) => ui::notice("Context staged but the body did not carry the message"),
        (Some(d), true) => ui::success(&format!("Appended {}", d.injection_text.trim())),
    }
    println!("{}", out.request.body.unwrap_or_default());
    Ok(())
}
