//! The aggregation taxonomy

use serde::{Deserialize, Serialize};

const T1S: f64 = 1.0;
const T1M: f64 = 60.0;
const T1H: f64 = 3600.0;
const T1D: f64 = 86400.0;
const T7D: f64 = 7.0 * T1D;
const T30D: f64 = 30.0 * T1D;
const T90D: f64 = 90.0 * T1D;
const T365D: f64 = 365.0 * T1D;

/// Every aggregation the engine can apply to a match set.
///
/// The serialized names are the ones users pass in commands and the ones
/// embedded in generated SQL.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum Aggregation {
    #[serde(rename = "AVG")]
    Avg,
    #[serde(rename = "AVG TIME BETWEEN")]
    AvgTimeBetween,
    #[serde(rename = "COUNT")]
    Count,
    #[serde(rename = "COUNT DISTINCT")]
    CountDistinct,
    #[serde(rename = "COUNT DISTINCT OVER COUNT")]
    CountDistinctOverCount,
    #[serde(rename = "COUNT MINUS COUNT DISTINCT")]
    CountMinusCountDistinct,
    #[serde(rename = "EWMA_1S")]
    Ewma1s,
    #[serde(rename = "EWMA_1M")]
    Ewma1m,
    #[serde(rename = "EWMA_1H")]
    Ewma1h,
    #[serde(rename = "EWMA_1D")]
    Ewma1d,
    #[serde(rename = "EWMA_7D")]
    Ewma7d,
    #[serde(rename = "EWMA_30D")]
    Ewma30d,
    #[serde(rename = "EWMA_90D")]
    Ewma90d,
    #[serde(rename = "EWMA_365D")]
    Ewma365d,
    #[serde(rename = "EWMA_TREND_1S")]
    EwmaTrend1s,
    #[serde(rename = "EWMA_TREND_1M")]
    EwmaTrend1m,
    #[serde(rename = "EWMA_TREND_1H")]
    EwmaTrend1h,
    #[serde(rename = "EWMA_TREND_1D")]
    EwmaTrend1d,
    #[serde(rename = "EWMA_TREND_7D")]
    EwmaTrend7d,
    #[serde(rename = "EWMA_TREND_30D")]
    EwmaTrend30d,
    #[serde(rename = "EWMA_TREND_90D")]
    EwmaTrend90d,
    #[serde(rename = "EWMA_TREND_365D")]
    EwmaTrend365d,
    #[serde(rename = "FIRST")]
    First,
    #[serde(rename = "KURTOSIS")]
    Kurtosis,
    #[serde(rename = "LAST")]
    Last,
    #[serde(rename = "MAX")]
    Max,
    #[serde(rename = "MEDIAN")]
    Median,
    #[serde(rename = "MIN")]
    Min,
    #[serde(rename = "MODE")]
    Mode,
    #[serde(rename = "NUM MAX")]
    NumMax,
    #[serde(rename = "NUM MIN")]
    NumMin,
    #[serde(rename = "Q1")]
    Q1,
    #[serde(rename = "Q5")]
    Q5,
    #[serde(rename = "Q10")]
    Q10,
    #[serde(rename = "Q25")]
    Q25,
    #[serde(rename = "Q75")]
    Q75,
    #[serde(rename = "Q90")]
    Q90,
    #[serde(rename = "Q95")]
    Q95,
    #[serde(rename = "Q99")]
    Q99,
    #[serde(rename = "SKEW")]
    Skew,
    #[serde(rename = "STDDEV")]
    Stddev,
    #[serde(rename = "SUM")]
    Sum,
    #[serde(rename = "TIME SINCE FIRST EVENT")]
    TimeSinceFirstEvent,
    #[serde(rename = "TIME SINCE LAST EVENT")]
    TimeSinceLastEvent,
    #[serde(rename = "TIME SINCE FIRST MAXIMUM")]
    TimeSinceFirstMaximum,
    #[serde(rename = "TIME SINCE FIRST MINIMUM")]
    TimeSinceFirstMinimum,
    #[serde(rename = "TIME SINCE LAST MAXIMUM")]
    TimeSinceLastMaximum,
    #[serde(rename = "TIME SINCE LAST MINIMUM")]
    TimeSinceLastMinimum,
    #[serde(rename = "TREND")]
    Trend,
    #[serde(rename = "VAR")]
    Var,
    #[serde(rename = "VARIATION COEFFICIENT")]
    VariationCoefficient,
}

impl Aggregation {
    /// The name users see in commands, feature descriptions and SQL.
    pub fn name(&self) -> String {
        serde_json::to_value(self)
            .map(|v| v.as_str().unwrap_or_default().to_string())
            .unwrap_or_default()
    }

    /// Whether the aggregation applies to a categorical id stream.
    pub fn is_categorical(&self) -> bool {
        matches!(
            self,
            Aggregation::CountDistinct | Aggregation::CountMinusCountDistinct
        )
    }

    /// Whether the aggregation applies to a numeric projection. COUNT is the
    /// one aggregation that needs no input column at all.
    pub fn is_numerical(&self) -> bool {
        *self != Aggregation::Count
    }

    /// Whether the aggregation consumes `(time stamp, value)` pairs rather
    /// than a plain numeric range. These require time stamps on both sides.
    pub fn is_pair_based(&self) -> bool {
        self.half_life().is_some()
            || matches!(
                self,
                Aggregation::First
                    | Aggregation::Last
                    | Aggregation::Trend
                    | Aggregation::TimeSinceFirstEvent
                    | Aggregation::TimeSinceLastEvent
                    | Aggregation::TimeSinceFirstMaximum
                    | Aggregation::TimeSinceFirstMinimum
                    | Aggregation::TimeSinceLastMaximum
                    | Aggregation::TimeSinceLastMinimum
            )
    }

    /// The half-life of an EWMA-family aggregation, in seconds.
    pub fn half_life(&self) -> Option<f64> {
        match self {
            Aggregation::Ewma1s | Aggregation::EwmaTrend1s => Some(T1S),
            Aggregation::Ewma1m | Aggregation::EwmaTrend1m => Some(T1M),
            Aggregation::Ewma1h | Aggregation::EwmaTrend1h => Some(T1H),
            Aggregation::Ewma1d | Aggregation::EwmaTrend1d => Some(T1D),
            Aggregation::Ewma7d | Aggregation::EwmaTrend7d => Some(T7D),
            Aggregation::Ewma30d | Aggregation::EwmaTrend30d => Some(T30D),
            Aggregation::Ewma90d | Aggregation::EwmaTrend90d => Some(T90D),
            Aggregation::Ewma365d | Aggregation::EwmaTrend365d => Some(T365D),
            _ => None,
        }
    }
}

impl std::fmt::Display for Aggregation {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(&self.name())
    }
}
