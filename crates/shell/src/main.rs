//! Wires the session engine against a seeded in-memory directory, signs one
//! principal in, and prints the settled session as JSON.
//!
//! Usage: `concierge-shell <directory-seed.json> <principal-id> <email> [display-name]`

use std::sync::Arc;

use anyhow::{bail, Context};

use concierge_auth::Principal;
use concierge_core::PrincipalId;
use concierge_infra::{EngineConfig, InMemoryDirectory, InMemoryIdentityProvider};
use concierge_session::{GateDecision, RequireSession, SessionController, SessionPhase};

#[tokio::main(flavor = "current_thread")]
async fn main() -> anyhow::Result<()> {
    concierge_observability::init();

    let args: Vec<String> = std::env::args().skip(1).collect();
    let [seed_path, principal_id, email, rest @ ..] = args.as_slice() else {
        bail!("usage: concierge-shell <directory-seed.json> <principal-id> <email> [display-name]");
    };

    let config = EngineConfig::from_env();
    let seed = std::fs::read_to_string(seed_path)
        .with_context(|| format!("reading directory seed {seed_path}"))?;
    let directory = Arc::new(InMemoryDirectory::from_json_str(&seed)?);
    let provider = Arc::new(InMemoryIdentityProvider::new());

    let controller = SessionController::new(
        provider.clone(),
        directory.clone(),
        config.collections.clone(),
    );
    let mut reader = controller.reader();
    controller.init();
    reader.wait_ready().await?;

    let mut principal = Principal::new(PrincipalId::new(principal_id.as_str())?, email)?;
    if let Some(name) = rest.first() {
        principal = principal.with_display_name(name.as_str());
    }
    let principal_id = principal.id.clone();
    provider.sign_in(principal);

    // Settled for this principal, or denied and signed out.
    let snapshot = reader
        .wait_until(|s| {
            s.ready
                && (s.principal.as_ref().is_some_and(|p| p.id == principal_id)
                    || (s.phase == SessionPhase::Idle && s.error.is_some()))
        })
        .await?;

    let gate = RequireSession::new(&config.routes);
    match gate.evaluate(&snapshot, "/") {
        GateDecision::Redirect { to, .. } => tracing::info!(to = %to, "gate redirects"),
        decision => tracing::info!(decision = ?decision, "gate decision"),
    }

    println!("{}", serde_json::to_string_pretty(&snapshot)?);
    controller.teardown();
    Ok(())
}
