use utoipa::OpenApi;

fn main() -> Result<(), Box<dyn std::error::Error>> {
    let doc = k8sadmin_backend::api::openapi::ApiDoc::openapi();
    let path = std::env::args().nth(1).unwrap_or_else(|| "openapi.json".to_string());
    std::fs::write(&path, doc.to_pretty_json()?)?;
    println!("Wrote {}", path);
    Ok(())
}
