pub mod icons;
pub mod output;
pub mod progress;
pub mod table;
pub mod theme;

pub use icons::Icons;
pub use output::{banner, empty, error, header, status, success, summary_row, timing, warn};
pub use progress::{CommitProgress, Spinner};
pub use table::{clone_table, entity_table, ranking_table, stats_table, TableBuilder};
pub use theme::{init_theme, theme, Theme};
