pub struct Icons;

impl Icons {
    pub const ROCKET: &str = "🚀";
    pub const SEARCH: &str = "🔍";
    pub const CHECK: &str = "✅";
    pub const CROSS: &str = "❌";
    pub const WARN: &str = "⚠️";
    pub const INFO: &str = "ℹ️";
    pub const STATS: &str = "📊";
    pub const LINK: &str = "🔗";
    pub const EYE: &str = "👀";
    pub const PACKAGE: &str = "📦";
    pub const DATABASE: &str = "🗄️";
    pub const LOCK: &str = "🔒";
    pub const UNLOCK: &str = "🔓";
    pub const HUB: &str = "🛰️";
    pub const UP: &str = "⬆️";
    pub const DOWN: &str = "⬇️";
    pub const DIRECT: &str = "🔴";
    pub const TRANSITIVE: &str = "🟠";
    pub const SKIPPED: &str = "⏭️";
    pub const EMPTY: &str = "∅";
}
