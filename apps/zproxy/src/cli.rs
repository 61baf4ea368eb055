use clap::Parser;

#[derive(Parser)]
#[command(name = "zproxy", version)]
pub(crate) struct Cli {
    #[arg(long, env = "ZPROXY_HOST", default_value = "127.0.0.1")]
    pub(crate) host: String,

    #[arg(long, env = "ZPROXY_PORT", default_value_t = 8788)]
    pub(crate) port: u16,

    /// Credential store DSN, e.g. `sqlite://zproxy.db?mode=rwc`. Empty
    /// runs without persistence.
    #[arg(long, env = "ZPROXY_DSN", default_value = "")]
    pub(crate) dsn: String,

    /// Upstream base URL.
    #[arg(long, env = "ZPROXY_BASE_URL", default_value = "https://chat.z.ai")]
    pub(crate) base_url: String,

    /// Tokens to seed the pool with, comma separated.
    #[arg(long, env = "ZPROXY_TOKENS", value_delimiter = ',')]
    pub(crate) tokens: Vec<String>,

    /// Fetch a guest token per request instead of using the pool.
    #[arg(long, env = "ZPROXY_ANONYMOUS", default_value_t = false)]
    pub(crate) anonymous: bool,

    /// Outbound proxy URL for upstream calls.
    #[arg(long, env = "ZPROXY_PROXY")]
    pub(crate) proxy: Option<String>,

    /// Consecutive failures before a credential leaves rotation.
    #[arg(long, default_value_t = 3)]
    pub(crate) failure_threshold: u32,

    /// Seconds a disabled credential sits out before it may be retried.
    #[arg(long, default_value_t = 1800)]
    pub(crate) recovery_timeout: u64,

    /// Seconds between background credential probes; 0 disables the loop.
    #[arg(long, default_value_t = 1800)]
    pub(crate) health_interval: u64,

    /// Upstream connection attempts per request.
    #[arg(long, default_value_t = 3)]
    pub(crate) max_attempts: u32,
}
