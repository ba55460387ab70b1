//! Synthetic Transaction Generator
//!
//! Emits legitimate and suspicious transaction contexts as JSONL on stdout,
//! suitable as input to `risk-replay`.
//!
//! Usage: generate-transactions [count] [fraud_rate] [users]

use chrono::{DateTime, Duration, Utc};
use payment_risk_engine::{BillingAddress, DeviceAttributes, TransactionContext};
use rand::Rng;
use std::io::Write;
use tracing::info;

const BROWSERS: [&str; 4] = [
    "Mozilla/5.0 (Windows NT 10.0; Win64; x64) AppleWebKit/537.36 (KHTML, like Gecko) Chrome/124.0 Safari/537.36",
    "Mozilla/5.0 (Macintosh; Intel Mac OS X 14_4) AppleWebKit/605.1.15 (KHTML, like Gecko) Version/17.4 Safari/605.1.15",
    "Mozilla/5.0 (X11; Linux x86_64; rv:125.0) Gecko/20100101 Firefox/125.0",
    "Mozilla/5.0 (iPhone; CPU iPhone OS 17_4 like Mac OS X) AppleWebKit/605.1.15 Version/17.4 Mobile/15E148 Safari/604.1",
];

const AUTOMATION: [&str; 3] = [
    "Mozilla/5.0 (X11; Linux x86_64) AppleWebKit/537.36 (KHTML, like Gecko) HeadlessChrome/124.0 Safari/537.36",
    "python-requests/2.31",
    "curl/8.5.0",
];

/// Spread of legitimate timestamps behind the wall clock, in seconds
const LEGITIMATE_SPREAD_SECS: i64 = 3_600;
/// Suspicious traffic arrives in a tight burst
const BURST_SPREAD_SECS: i64 = 120;

/// Transaction generator for replay testing
struct TransactionGenerator {
    rng: rand::rngs::ThreadRng,
    transaction_counter: u64,
    users: u32,
}

impl TransactionGenerator {
    fn new(users: u32) -> Self {
        Self {
            rng: rand::thread_rng(),
            transaction_counter: 0,
            users: users.max(1),
        }
    }

    fn next_id(&mut self) -> String {
        self.transaction_counter += 1;
        format!("tx_{:012}", self.transaction_counter)
    }

    /// A moment within `spread_secs` before now, so replayed records land in
    /// the buckets live velocity windows read
    fn recent(&mut self, spread_secs: i64) -> DateTime<Utc> {
        Utc::now() - Duration::seconds(self.rng.gen_range(0..spread_secs))
    }

    /// A user's stable device; the same user always presents the same attributes
    fn device_for(&self, user: u32) -> DeviceAttributes {
        let browser = BROWSERS[user as usize % BROWSERS.len()];
        DeviceAttributes::new()
            .with("user_agent", browser)
            .with("language", "en-US")
            .with("timezone", "America/New_York")
            .with("platform", if user % 2 == 0 { "Win32" } else { "MacIntel" })
            .with("screen_resolution", if user % 3 == 0 { "1920x1080" } else { "2560x1440" })
            .with("color_depth", "24")
            .with("hardware_concurrency", "8")
            .with("canvas_hash", format!("{:08x}", user.wrapping_mul(2_654_435_761)))
            .with("webgl_vendor", "Google Inc.")
            .with("plugins", "pdf viewer")
    }

    /// Generate a routine transaction from a returning user
    fn generate_legitimate(&mut self) -> TransactionContext {
        let user = self.rng.gen_range(0..self.users);
        let timestamp = self.recent(LEGITIMATE_SPREAD_SECS);
        let country = ["US", "GB", "CA", "DE", "FR"][user as usize % 5];

        TransactionContext::new(
            self.next_id(),
            format!("user_{user:05}"),
            self.rng.gen_range(1_000..25_000),
            "USD",
            format!("pm_{user:05}_1"),
        )
        .with_customer(format!("cus_{user:05}"))
        .with_timestamp(timestamp)
        .with_client(
            format!("198.51.{}.{}", user % 250, self.rng.gen_range(1..255)),
            BROWSERS[user as usize % BROWSERS.len()],
        )
        .with_device_attributes(self.device_for(user))
        .with_billing_address(BillingAddress {
            line1: Some(format!("{} Main St", self.rng.gen_range(1..999))),
            city: None,
            postal_code: None,
            country: country.to_string(),
        })
    }

    /// Generate a suspicious transaction: large, automated, bursty,
    /// unfamiliar payment method or high-risk geography
    fn generate_suspicious(&mut self) -> TransactionContext {
        let user = self.rng.gen_range(0..self.users);
        let timestamp = self.recent(BURST_SPREAD_SECS);
        let country = ["KP", "IR", "NG", "US"][self.rng.gen_range(0..4)];
        let user_agent = AUTOMATION[self.rng.gen_range(0..AUTOMATION.len())];

        let mut attributes = DeviceAttributes::new()
            .with("user_agent", user_agent)
            .with("screen_resolution", "0x0");
        if self.rng.gen_bool(0.5) {
            attributes.insert("webdriver", "true");
        }

        TransactionContext::new(
            self.next_id(),
            format!("user_{user:05}"),
            self.rng.gen_range(150_000..2_000_000),
            self.random_choice(&["USD", "EUR"]),
            format!("pm_{:016x}", self.rng.gen::<u64>()),
        )
        .with_timestamp(timestamp)
        .with_client(
            format!(
                "{}.{}.{}.{}",
                self.rng.gen_range(1..224),
                self.rng.gen_range(0..255),
                self.rng.gen_range(0..255),
                self.rng.gen_range(1..255)
            ),
            user_agent,
        )
        .with_device_attributes(attributes)
        .with_billing_address(BillingAddress {
            line1: None,
            city: None,
            postal_code: None,
            country: country.to_string(),
        })
    }

    fn random_choice<'a>(&mut self, choices: &[&'a str]) -> &'a str {
        choices[self.rng.gen_range(0..choices.len())]
    }
}

fn main() -> anyhow::Result<()> {
    // Logs go to stderr; stdout carries the JSONL
    tracing_subscriber::fmt()
        .with_env_filter(
            tracing_subscriber::EnvFilter::from_default_env()
                .add_directive("generate_transactions=info".parse()?),
        )
        .with_writer(std::io::stderr)
        .init();

    let args: Vec<String> = std::env::args().collect();
    let count: u64 = args.get(1).and_then(|s| s.parse().ok()).unwrap_or(100);
    let fraud_rate: f64 = args
        .get(2)
        .and_then(|s| s.parse().ok())
        .unwrap_or(0.1_f64)
        .clamp(0.0, 1.0);
    let users: u32 = args.get(3).and_then(|s| s.parse().ok()).unwrap_or(50);

    info!(count = count, fraud_rate = fraud_rate, users = users, "Generating transactions");

    let mut generator = TransactionGenerator::new(users);
    let mut rng = rand::thread_rng();
    let stdout = std::io::stdout();
    let mut out = stdout.lock();

    let mut legitimate_count = 0;
    let mut suspicious_count = 0;

    for _ in 0..count {
        let transaction = if rng.gen_bool(fraud_rate) {
            suspicious_count += 1;
            generator.generate_suspicious()
        } else {
            legitimate_count += 1;
            generator.generate_legitimate()
        };

        serde_json::to_writer(&mut out, &transaction)?;
        writeln!(out)?;
    }

    info!(
        "Completed! Generated {} transactions ({} legitimate, {} suspicious)",
        count, legitimate_count, suspicious_count
    );

    Ok(())
}
