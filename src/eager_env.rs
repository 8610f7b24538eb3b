use std::env;
use std::sync::LazyLock;
use url::Url;

fn parse_or_panic<T: std::str::FromStr>(env_name: &str, val: &str, type_name: &str) -> T {
    val.parse::<T>().unwrap_or_else(|_| {
        panic!("Failed to parse environment variable {env_name} with value '{val}' as {type_name}")
    })
}

macro_rules! define_env_vars {
    (
        required: { $(($name:ident, $env_name:expr, $type:ty $(, $default:expr)?)),* $(,)? },
        optional: { $(($opt_name:ident, $opt_env_name:expr, $opt_type:ty)),* $(,)? } $(,)?
    ) => {
        $(
            pub static $name: LazyLock<$type> = LazyLock::new(|| {
                let val = env::var($env_name)
                    .ok()
                    $(.or_else(|| Some($default.to_string())))?
                    .unwrap_or_else(|| {
                        panic!("Missing required environment variable: {}", $env_name)
                    });
                parse_or_panic::<$type>($env_name, &val, stringify!($type))
            });
        )*

        $(
            pub static $opt_name: LazyLock<Option<$opt_type>> = LazyLock::new(|| {
                env::var($opt_env_name)
                    .ok()
                    .filter(|val| !val.trim().is_empty())
                    .map(|val| parse_or_panic::<$opt_type>($opt_env_name, &val, stringify!($opt_type)))
            });
        )*

        /// Force initialization of all environment variables at startup
        /// Call this early in main() to fail fast if any env vars are missing
        pub fn check_env() {
            $(
                let _ = *$name;
            )*
            $(
                let _ = *$opt_name;
            )*
        }
    };
}

define_env_vars!(
    required: {
        (ALARMS_FILE, "ALARMS_FILE", String),
        (METRICS_URL, "METRICS_URL", Url, "http://localhost:8041"),
        (METRICS_TIMEOUT_SECONDS, "METRICS_TIMEOUT_SECONDS", u64, 10),
        (
            HEARTBEAT_INTERVAL_SECONDS,
            "HEARTBEAT_INTERVAL_SECONDS",
            u64,
            1
        ),
        (CHECK_WATCHERS_SECONDS, "CHECK_WATCHERS_SECONDS", u64, 10),
        (MEMBER_TIMEOUT_SECONDS, "MEMBER_TIMEOUT_SECONDS", u64, 30),
        (
            EVALUATION_INTERVAL_SECONDS,
            "EVALUATION_INTERVAL_SECONDS",
            u64,
            60
        ),
        (
            MAX_CONCURRENT_EVALUATIONS,
            "MAX_CONCURRENT_EVALUATIONS",
            usize,
            16
        ),
        (FETCH_RETRIES, "FETCH_RETRIES", u32, 1),
        (
            FETCH_RETRY_BACKOFF_MILLIS,
            "FETCH_RETRY_BACKOFF_MILLIS",
            u64,
            500
        ),
        (LOOK_BACK_PERIODS, "LOOK_BACK_PERIODS", u32, 0),
    },
    optional: {
        (COORDINATION_URL, "COORDINATION_URL", String),
        (PARTITION_GROUP, "PARTITION_GROUP", String),
        (NODE_ID, "NODE_ID", String),
    },
);
