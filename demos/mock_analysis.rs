//! Example: analyzing a canvas with MockBackend standing in for the model.
//!
//! Run with: `cargo run --example mock_analysis`

use base64::engine::general_purpose::STANDARD;
use base64::Engine;
use image::{DynamicImage, ImageFormat, Rgba, RgbaImage};
use inkcalc::{
    decode_data_url, AnalysisEngine, AnalysisResponse, ExecCtx, LlmRecognizer, MockBackend,
    RetryConfig, VariableMapping,
};
use std::io::Cursor;
use std::sync::Arc;

#[tokio::main]
async fn main() -> Result<(), Box<dyn std::error::Error>> {
    // A blank canvas, encoded the way a browser would send it
    let mut png = Cursor::new(Vec::new());
    DynamicImage::ImageRgba8(RgbaImage::from_pixel(64, 32, Rgba([0, 0, 0, 255])))
        .write_to(&mut png, ImageFormat::Png)?;
    let data_url = format!("data:image/png;base64,{}", STANDARD.encode(png.into_inner()));

    // What a vision model might answer, Python literals and all
    let mock = MockBackend::fixed(
        "Sure! [{'expr': 'x = 4', 'result': 4, 'assign': True}, \
         {'expr': '2x + y = 20', 'kind': 'equation'}, {'expr': 'x * y'}]",
    );

    let ctx = ExecCtx::builder("http://unused")
        .backend(Arc::new(mock))
        .build()?;
    let recognizer = LlmRecognizer::new(Arc::new(ctx), "llama3.2-vision").with_retry(RetryConfig::new(1));
    let engine = AnalysisEngine::new(Arc::new(recognizer));

    let image = decode_data_url(&data_url)?;
    let records = engine.analyze(&image, VariableMapping::new(), None).await?;

    for record in &records {
        println!("{:>12} = {} (assign: {}, {})", record.expression, record.result, record.assign, record.kind);
    }
    println!("{}", serde_json::to_string_pretty(&AnalysisResponse::success(records))?);

    Ok(())
}
