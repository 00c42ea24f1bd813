//! Background leaf-disease diagnosis.
//!
//! A job reads the uploaded images, sends them to the AI provider in one
//! request, renders the returned markdown report to HTML and records the
//! outcome in the status cache. Whatever happens inside the analysis, the
//! job's record ends in `completed` or `failed`.

use pulldown_cmark::{html, Event, Options, Parser};
use std::sync::Arc;
use std::time::Instant;

use crate::models::job::{DiagnosisJob, DiagnosisStatus};
use crate::services::gemini::{GatewayError, GeminiClient, InlineImage, NO_RESULT};
use crate::services::status::StatusCache;
use crate::services::storage::BlobStore;

/// Where the latest rendered report is kept for manual inspection.
pub const DEBUG_REPORT_PATH: &str = "results/diagnosis_all.html";

const FALLBACK_MIME: &str = "image/jpeg";

/// Everything a diagnosis job needs, cheap to clone into worker tasks.
#[derive(Clone)]
pub struct DiagnosisContext {
    pub gateway: Arc<GeminiClient>,
    pub blobs: Arc<dyn BlobStore>,
    pub status: StatusCache,
    pub language: Arc<str>,
}

impl DiagnosisContext {
    pub fn new(
        gateway: Arc<GeminiClient>,
        blobs: Arc<dyn BlobStore>,
        status: StatusCache,
        language: &str,
    ) -> Self {
        Self {
            gateway,
            blobs,
            status,
            language: Arc::from(language),
        }
    }
}

/// Run one job to a terminal state and return that state.
pub async fn run(ctx: &DiagnosisContext, job: &DiagnosisJob) -> DiagnosisStatus {
    let start = Instant::now();

    if let Err(e) = ctx.status.mark_processing(job.job_id).await {
        tracing::error!(job_id = %job.job_id, error = %e, "Failed to record processing state");
    }
    tracing::info!(
        job_id = %job.job_id,
        images = job.image_paths.len(),
        queued_ms = (chrono::Utc::now() - job.enqueued_at).num_milliseconds(),
        "Diagnosis job started"
    );

    // The analysis runs in its own task so a panic is observed as a failure.
    let task = tokio::spawn({
        let ctx = ctx.clone();
        let job = job.clone();
        async move { analyze(&ctx, &job).await }
    });
    let outcome = match task.await {
        Ok(Ok(html)) => Ok(html),
        Ok(Err(e)) => Err(e.to_string()),
        Err(e) => Err(format!("diagnosis task aborted: {e}")),
    };

    let status = match outcome {
        Ok(html) => {
            let length = html.len();
            if let Err(e) = ctx.status.mark_completed(job.job_id, html.clone()).await {
                tracing::error!(job_id = %job.job_id, error = %e, "Failed to record diagnosis");
            }
            tracing::info!(job_id = %job.job_id, length, "Diagnosis cached");
            save_debug_report(ctx.blobs.as_ref(), &html).await;
            DiagnosisStatus::Completed
        }
        Err(reason) => {
            tracing::error!(job_id = %job.job_id, error = %reason, "Diagnosis job failed");
            if let Err(e) = ctx.status.mark_failed(job.job_id, &reason).await {
                tracing::error!(job_id = %job.job_id, error = %e, "Failed to record failure");
            }
            DiagnosisStatus::Failed
        }
    };

    metrics::counter!("diagnosis_jobs_total", "status" => status.to_string()).increment(1);
    metrics::histogram!("diagnosis_job_seconds").record(start.elapsed().as_secs_f64());

    status
}

async fn analyze(ctx: &DiagnosisContext, job: &DiagnosisJob) -> Result<String, GatewayError> {
    let instruction = diagnosis_instruction(&ctx.language);
    let images = load_images(ctx.blobs.as_ref(), &job.image_paths).await;

    tracing::debug!(
        job_id = %job.job_id,
        requested = job.image_paths.len(),
        readable = images.len(),
        "Calling AI provider for diagnosis"
    );

    let report = ctx.gateway.generate_from_images(&instruction, &images).await?;
    Ok(render_report(&report))
}

/// Read every stored image; unreadable ones are left out of the request.
async fn load_images(blobs: &dyn BlobStore, paths: &[String]) -> Vec<InlineImage> {
    let mut images = Vec::with_capacity(paths.len());
    for path in paths {
        match blobs.get(path).await {
            Ok(data) => {
                let mime_type = image::guess_format(&data)
                    .map(|format| format.to_mime_type())
                    .unwrap_or(FALLBACK_MIME)
                    .to_string();
                images.push(InlineImage { mime_type, data });
            }
            Err(e) => {
                tracing::warn!(path = %path, error = %e, "Image not readable, skipping");
            }
        }
    }
    images
}

async fn save_debug_report(blobs: &dyn BlobStore, html: &str) {
    if let Err(e) = blobs
        .put(DEBUG_REPORT_PATH, html.as_bytes(), "text/html; charset=utf-8")
        .await
    {
        tracing::warn!(error = %e, "Failed to write diagnosis HTML file");
    }
}

/// Render the model's markdown report to HTML.
///
/// Raw HTML in the report is escaped rather than passed through.
pub fn render_report(markdown: &str) -> String {
    let markdown = if markdown.trim().is_empty() {
        NO_RESULT
    } else {
        markdown
    };

    let mut options = Options::empty();
    options.insert(Options::ENABLE_TABLES);
    options.insert(Options::ENABLE_STRIKETHROUGH);

    let parser = Parser::new_ext(markdown, options).map(|event| match event {
        Event::Html(raw) | Event::InlineHtml(raw) => Event::Text(raw),
        other => other,
    });

    let mut out = String::with_capacity(markdown.len() * 3 / 2);
    html::push_html(&mut out, parser);
    out
}

/// The fixed report template sent with every diagnosis request.
pub fn diagnosis_instruction(language: &str) -> String {
    format!(
        r#"You are an experienced plant pathologist and agronomist who diagnoses foliar diseases of vegetable and cash crops in the field. Analyse all the attached images together and write ONE combined report in {language}. Output Markdown only, following the structure below exactly.

- Output language: {language}.
- Tone: professional, concise and actionable, written for agronomists and agricultural extension officers.
- Use H2 headings for main sections and H3 headings for sub-sections. Put a horizontal rule (---) between main sections.

Required sections:
1. ## Executive summary
   - Two or three short sentences with the overall findings and your confidence.

2. ## Per-image observations
   - For each image, labelled **Image 1**, **Image 2**, ... in the order received:
     - ### Observed symptoms
       - Bullet list of visible signs, in short phrases.
     - ### Immediate impression (differential)
       - Two or three possible diagnoses, each with a one-line rationale and a confidence of High, Medium or Low.

3. ## Combined diagnosis (consolidated)
   - The most likely diagnoses. For each: a one or two line description, a confidence of High, Medium or Low, and the images and symptoms that support it.

4. ## Immediate actions (urgent steps)
   - Short practical steps marked with emojis (✔️, ❌, 🌱).
   - What to do now, for example removing infected leaves or isolating plants.
   - When chemical control is advised: the active ingredient (English name), the dose (g or ml per litre), spray interval and a safety note, plus one or two product names commonly sold locally if known.

5. ## Treatment options (detailed)
   - Non-chemical measures (cultural practices, sanitation).
   - Chemical measures: active ingredient, dose, timing and number of sprays.
   - Resistance management advice (rotate active ingredients).

6. ## Prevention & good practices
   - Planting, irrigation, spacing, seed selection and nutrition.

7. ## Sampling & when to consult an expert
   - How to collect and store a sample, which specialist to contact and what information to give them.

8. ## Short reference / next steps
   - One or two resources or a short checklist of next steps.

Formatting rules:
- Bullets only, each at most two lines.
- Use emojis where they help (✔️, ❌, 🌱, 🔬).
- Keep the report between roughly 300 and 800 words while covering every section.
- When uncertain, give the top three differential diagnoses with confidence levels.
- Do not output HTML. Markdown only.
- If an image is unreadable, too blurry or missing, say so under Per-image observations (for example "Image 3: unreadable / low resolution").
- When the report language is not English, follow every English technical term with its {language} translation in parentheses, for example "active ingredient (...)".

Finish with a single actionable line in bold starting with **Next step:**, for example: **Next step:** contact the nearest agricultural officer and send one fresh symptomatic leaf sample."#
    )
}
