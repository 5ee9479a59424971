use tracing_subscriber::{fmt, EnvFilter};

/// Load environment files and initialize structured tracing based on RUST_LOG.
///
/// Env file lookup order (first hit wins, existing variables are never overwritten):
/// - explicit path in ENV_FILE or DOTENV_PATH
/// - `.env` discovered from the working directory upwards
pub fn init_tracing() {
    let mut env_source: String = "none".into();
    for key in ["ENV_FILE", "DOTENV_PATH"] {
        if let Ok(p) = std::env::var(key) {
            let p = p.trim();
            if !p.is_empty()
                && std::path::Path::new(p).is_file()
                && dotenvy::from_filename(p).is_ok()
            {
                env_source = format!("{p} ({key})");
                break;
            }
        }
    }

    if env_source == "none" {
        if let Ok(path) = dotenvy::dotenv() {
            env_source = path.display().to_string();
        }
    }

    let filter = std::env::var("RUST_LOG").unwrap_or_else(|_| "info,actix_web=info".into());
    let subscriber = fmt().with_env_filter(EnvFilter::new(filter)).finish();
    let _ = tracing::subscriber::set_global_default(subscriber);

    tracing::info!("Environment loaded from: {}", env_source);
}

/// Interpret an env variable as a boolean flag (1/true/yes/on).
pub fn env_truthy(name: &str, default: bool) -> bool {
    match std::env::var(name) {
        Ok(v) => {
            let s = v.trim().to_ascii_lowercase();
            s == "1" || s == "true" || s == "yes" || s == "on"
        }
        Err(_) => default,
    }
}

/// Build CORS configuration from environment variables.
///
/// Recognized env vars:
/// - CORS_ALLOWED_ORIGINS: comma-separated list or "*" (default: "*")
/// - CORS_ALLOWED_METHODS: comma-separated list or "*" (default: "*")
/// - CORS_ALLOW_CREDENTIALS: 1/true/yes/on (default: false)
/// - CORS_MAX_AGE: seconds (default: unset)
///
/// The configured API key header is always allowed so browsers can send it.
pub fn cors_config_from_env(api_key_header: &str) -> actix_cors::Cors {
    let mut cors = actix_cors::Cors::default()
        .allowed_header(actix_web::http::header::ACCEPT)
        .allowed_header(actix_web::http::header::CONTENT_TYPE)
        .allowed_header(api_key_header);

    match std::env::var("CORS_ALLOWED_ORIGINS") {
        Ok(origins) if origins.trim() != "*" => {
            for p in split_list(&origins) {
                cors = cors.allowed_origin(p);
            }
        }
        _ => cors = cors.allow_any_origin(),
    }

    match std::env::var("CORS_ALLOWED_METHODS") {
        Ok(methods) if methods.trim() != "*" => {
            let methods: Vec<&str> = split_list(&methods).collect();
            if !methods.is_empty() {
                cors = cors.allowed_methods(methods);
            }
        }
        _ => cors = cors.allow_any_method(),
    }

    if env_truthy("CORS_ALLOW_CREDENTIALS", false) {
        cors = cors.supports_credentials();
    }

    if let Ok(secs) = std::env::var("CORS_MAX_AGE") {
        if let Ok(n) = secs.trim().parse::<usize>() {
            cors = cors.max_age(n);
        }
    }

    cors
}

fn split_list(s: &str) -> impl Iterator<Item = &str> {
    s.split(',').map(str::trim).filter(|p| !p.is_empty())
}
