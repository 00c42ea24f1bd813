use garde::Validate;
use serde::{Deserialize, Serialize};
use serde_json::Value;

/// Farm details submitted for a crop recommendation.
///
/// `area` accepts a JSON number or a numeric string (HTML forms send the
/// latter); the value is forwarded to the prompt as written.
#[derive(Debug, Default, Deserialize, Validate)]
pub struct RecommendationRequest {
    #[garde(required, length(min = 1))]
    pub soil_type: Option<String>,

    #[garde(required, custom(numeric_area))]
    pub area: Option<Value>,

    #[garde(skip)]
    pub area_unit: Option<String>,

    #[garde(skip)]
    pub location: Option<String>,

    #[garde(skip)]
    pub previous_crop: Option<String>,

    #[garde(skip)]
    pub notes: Option<String>,
}

impl RecommendationRequest {
    /// Area as it appears in the prompt.
    pub fn area_text(&self) -> Option<String> {
        match self.area.as_ref()? {
            Value::Number(n) => Some(n.to_string()),
            Value::String(s) => Some(s.trim().to_string()),
            _ => None,
        }
    }
}

fn numeric_area(value: &Option<Value>, _ctx: &()) -> garde::Result {
    let numeric = match value {
        None => return Ok(()),
        Some(Value::Number(_)) => true,
        Some(Value::String(s)) => s.trim().parse::<f64>().map_or(false, f64::is_finite),
        Some(_) => false,
    };
    if numeric {
        Ok(())
    } else {
        Err(garde::Error::new("must be a number"))
    }
}

#[derive(Debug, Serialize, Deserialize)]
pub struct RecommendationResponse {
    pub suggestions: String,
}
