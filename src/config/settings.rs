use dotenv::dotenv;
use std::env;

#[derive(Debug, Clone)]
pub struct Settings {
    pub server_port: u16,
    pub database_url: String,
    pub telegram_bot_token: String,
    pub feed_url: String,
    pub cycle_min_minutes: u64,
    pub cycle_max_minutes: u64,
    pub cycle_soft_deadline_secs: u64,
    pub deal_concurrency: usize,
    pub notify_concurrency: usize,
    pub autotune_interval_hours: u64,
    pub outbound_timeout_secs: u64,
}

impl Settings {
    pub fn new() -> Result<Self, Box<dyn std::error::Error>> {
        dotenv().ok(); // loads `.env` file automatically

        let server_port = env::var("SERVER_PORT")
            .unwrap_or_else(|_| "8080".into())
            .parse::<u16>()
            .map_err(|_| "SERVER_PORT must be a valid u16")?;

        let database_url = env::var("DATABASE_URL").map_err(|_| "DATABASE_URL missing")?;
        let telegram_bot_token =
            env::var("TELEGRAM_BOT_TOKEN").map_err(|_| "TELEGRAM_BOT_TOKEN missing")?;
        let feed_url = env::var("FEED_URL")
            .unwrap_or_else(|_| "https://www.promodescuentos.com/rest_api/v2/thread?order=new".into());

        let cycle_min_minutes = parse_env_u64("CYCLE_MIN_MINUTES", 5)?;
        let cycle_max_minutes = parse_env_u64("CYCLE_MAX_MINUTES", 12)?;
        if cycle_min_minutes == 0 || cycle_min_minutes > cycle_max_minutes {
            return Err("CYCLE_MIN_MINUTES must be in 1..=CYCLE_MAX_MINUTES".into());
        }
        let cycle_soft_deadline_secs = parse_env_u64("CYCLE_SOFT_DEADLINE_SECS", 240)?;
        let deal_concurrency = parse_env_u64("DEAL_CONCURRENCY", 4)? as usize;
        let notify_concurrency = parse_env_u64("NOTIFY_CONCURRENCY", 10)? as usize;
        let autotune_interval_hours = parse_env_u64("AUTOTUNE_INTERVAL_HOURS", 6)?;
        let outbound_timeout_secs = parse_env_u64("OUTBOUND_TIMEOUT_SECS", 10)?;

        Ok(Self {
            server_port,
            database_url,
            telegram_bot_token,
            feed_url,
            cycle_min_minutes,
            cycle_max_minutes,
            cycle_soft_deadline_secs,
            deal_concurrency,
            notify_concurrency,
            autotune_interval_hours,
            outbound_timeout_secs,
        })
    }
}

fn parse_env_u64(key: &str, default: u64) -> Result<u64, String> {
    match env::var(key) {
        Ok(raw) => raw
            .parse::<u64>()
            .map_err(|_| format!("{key} must be a non-negative integer")),
        Err(_) => Ok(default),
    }
}
