use crate::models::recommendation::RecommendationRequest;

const MISSING: &str = "N/A";

/// Build the advisor prompt for a validated request.
///
/// Each field becomes a `Field: value` line, with the key's first letter
/// upper-cased (`Soil_type`, `Previous_crop`). Optional fields that were not
/// supplied read `N/A`; the area unit line only appears when a unit was sent.
pub fn build_prompt(request: &RecommendationRequest, language: &str) -> String {
    let mut fields: Vec<(&str, Option<String>)> = vec![
        ("soil_type", request.soil_type.clone()),
        ("area", request.area_text()),
    ];
    if let Some(unit) = request.area_unit.as_deref().filter(|u| !u.trim().is_empty()) {
        fields.push(("area_unit", Some(unit.to_string())));
    }
    fields.extend([
        ("location", request.location.clone()),
        ("previous_crop", request.previous_crop.clone()),
        ("notes", request.notes.clone()),
    ]);

    let mut prompt = String::from(
        "You are an agricultural advisor. Recommend exactly 3 best crops to plant \
         given these farm details:\n",
    );
    for (key, value) in fields {
        let value = value.filter(|v| !v.trim().is_empty());
        prompt.push_str(&capitalize(key));
        prompt.push_str(": ");
        prompt.push_str(value.as_deref().unwrap_or(MISSING));
        prompt.push('\n');
    }
    prompt.push_str(&format!(
        "\nReturn the answer in plain text (no markdown) in {language}."
    ));
    prompt
}

fn capitalize(key: &str) -> String {
    let mut chars = key.chars();
    match chars.next() {
        Some(first) => first.to_uppercase().chain(chars).collect(),
        None => String::new(),
    }
}
