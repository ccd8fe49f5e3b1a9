pub mod icons;
pub mod output;
pub mod table;
pub mod theme;

pub use icons::Icons;
pub use output::{
    dim, empty, error, header, hit, info, muted, refresh_outcome, repo_status, section, status, success,
    summary_row, warn,
};
pub use table::{hits_table, repos_table, rows_table, stats_table, TableBuilder};
pub use theme::{theme, Theme};
