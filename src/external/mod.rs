pub mod geoguessr;
pub mod sheets;

pub use geoguessr::{extract_duel_id, parse_geoguessr_id, DuelOutcome, GeoGuessrClient, ResultSource};
pub use sheets::{append_detached, sheet_sink_from_env, SharedSheetSink, Worksheet};
