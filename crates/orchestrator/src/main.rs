use firewatch_orchestrator::config::OrchestratorConfig;

fn main() {
    firewatch_observability::init();

    let config = match OrchestratorConfig::from_env() {
        Ok(c) => c,
        Err(e) => {
            tracing::error!(error = %e, "invalid configuration");
            std::process::exit(1);
        }
    };

    if let Err(e) = firewatch_orchestrator::run(config) {
        tracing::error!(error = ?e, "orchestrator failed");
        std::process::exit(1);
    }
}
