pub mod candle_buffer;
pub mod events;
pub mod score_buffer;
pub mod series;

pub use candle_buffer::{Candle, CandleBuffer, CandleUpdate, SeriesKey, SeriesSummary};
pub use events::SeriesEvent;
pub use score_buffer::{ScoreBuffer, ScorePoint, ScoreUpdate};
