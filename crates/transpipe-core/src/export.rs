//! Export Packager (component G): walks a client's confirmed
//! materials and emits a single zip archive containing each material's
//! original file, its final translated artifact, and a `list.txt` manifest.
//!
//! PDF sessions are merged into one translated PDF from their per-page
//! final artifacts via `pdf::overlay::combine_pdfs`, after first wrapping
//! each page's JPEG composite in a single-page PDF (`jpeg_to_single_page_pdf`
//! below) since an image material has no PDF bytes of its own to start
//! from.

use std::io::Write as _;

use zip::write::SimpleFileOptions;
use zip::ZipWriter;

use crate::blob::BlobStore;
use crate::error::{Error, Result};
use crate::model::Material;
use crate::pdf::combine_pdfs;
use crate::state_machine::ProcessingStep;
use crate::store::Store;

/// One original/translated pair written to the archive, tracked for the
/// `list.txt` manifest.
struct ManifestEntry {
    original_name: String,
    translated_name: String,
}

/// Build the export archive for one client. Returns the archive's file
/// name (`{client_name}_{YYYYMMDD_HHMM}.zip`) and its zip bytes.
pub fn export_client(store: &dyn Store, blobs: &dyn BlobStore, client_id: &str) -> Result<(String, Vec<u8>)> {
    let client = store.get_client(client_id)?;
    let materials = store.list_materials(client_id)?;
    let confirmed: Vec<Material> = materials.into_iter().filter(|m| m.processing_step == ProcessingStep::Confirmed).collect();

    let mut singles = Vec::new();
    let mut sessions: std::collections::BTreeMap<String, Vec<Material>> = std::collections::BTreeMap::new();
    for m in confirmed {
        if let Some(session_id) = m.pdf_session_id.clone() {
            sessions.entry(session_id).or_default().push(m);
        } else {
            singles.push(m);
        }
    }
    for pages in sessions.values_mut() {
        pages.sort_by_key(|m| m.pdf_page_number.unwrap_or(0));
    }

    let mut buf = Vec::new();
    let mut zip = ZipWriter::new(std::io::Cursor::new(&mut buf));
    let options = SimpleFileOptions::default().compression_method(zip::CompressionMethod::Deflated);
    let mut manifest = Vec::new();

    for material in &singles {
        if let Some(entry) = write_single_material(&mut zip, options, blobs, material)? {
            manifest.push(entry);
        }
    }
    for (session_id, pages) in &sessions {
        if let Some(entry) = write_pdf_session(&mut zip, options, blobs, session_id, pages)? {
            manifest.push(entry);
        }
    }

    write_manifest(&mut zip, options, &manifest)?;
    zip.finish().map_err(|e| Error::Export(format!("failed to finalize archive: {e}")))?;

    let timestamp = chrono::Local::now().format("%Y%m%d_%H%M");
    let archive_name = format!("{}_{timestamp}.zip", sanitize_filename(&client.name));
    Ok((archive_name, buf))
}

fn write_single_material(
    zip: &mut ZipWriter<std::io::Cursor<&mut Vec<u8>>>,
    options: SimpleFileOptions,
    blobs: &dyn BlobStore,
    material: &Material,
) -> Result<Option<ManifestEntry>> {
    let Some(original_path) = original_path_of(material) else {
        tracing::warn!(material_id = %material.id, "confirmed material has no original file, skipping export");
        return Ok(None);
    };
    let Some(translated_path) = translated_path_of(material) else {
        tracing::warn!(material_id = %material.id, "confirmed material has no translated artifact, skipping export");
        return Ok(None);
    };

    let stem = filename_stem(material);
    let original_ext = extension_of(&original_path);
    let translated_ext = extension_of(&translated_path);

    let original_name = format!("{stem}_原文.{original_ext}");
    let translated_name = format!("{stem}_translated.{translated_ext}");

    let original_bytes = blobs.load(&original_path)?;
    let translated_bytes = blobs.load(&translated_path)?;

    write_entry(zip, options, &original_name, &original_bytes)?;
    write_entry(zip, options, &translated_name, &translated_bytes)?;

    Ok(Some(ManifestEntry { original_name, translated_name }))
}

fn write_pdf_session(
    zip: &mut ZipWriter<std::io::Cursor<&mut Vec<u8>>>,
    options: SimpleFileOptions,
    blobs: &dyn BlobStore,
    session_id: &str,
    pages: &[Material],
) -> Result<Option<ManifestEntry>> {
    let Some(first) = pages.first() else { return Ok(None) };
    let Some(original_pdf_path) = first.original_pdf_path.clone() else {
        tracing::warn!(pdf_session_id = %session_id, "pdf session has no original pdf on record, skipping export");
        return Ok(None);
    };

    let mut page_pdfs = Vec::new();
    for page in pages {
        let Some(artifact_path) = translated_path_of(page) else {
            tracing::warn!(material_id = %page.id, pdf_session_id = %session_id, "pdf page has no final artifact, skipping page");
            continue;
        };
        let jpeg = blobs.load(&artifact_path)?;
        page_pdfs.push(jpeg_to_single_page_pdf(&jpeg)?);
    }
    if page_pdfs.is_empty() {
        tracing::warn!(pdf_session_id = %session_id, "pdf session has no usable pages, skipping export");
        return Ok(None);
    }
    let merged = combine_pdfs(&page_pdfs)?;

    let stem = sanitize_filename(first.pdf_original_file.as_deref().unwrap_or(session_id));
    let original_name = format!("{stem}_原文.pdf");
    let translated_name = format!("{stem}_translated.pdf");

    let original_bytes = blobs.load(&original_pdf_path)?;
    write_entry(zip, options, &original_name, &original_bytes)?;
    write_entry(zip, options, &translated_name, &merged)?;

    Ok(Some(ManifestEntry { original_name, translated_name }))
}

fn write_entry(
    zip: &mut ZipWriter<std::io::Cursor<&mut Vec<u8>>>,
    options: SimpleFileOptions,
    name: &str,
    bytes: &[u8],
) -> Result<()> {
    zip.start_file(name, options).map_err(|e| Error::Export(format!("failed to start entry {name}: {e}")))?;
    zip.write_all(bytes).map_err(|e| Error::Export(format!("failed to write entry {name}: {e}")))?;
    Ok(())
}

fn write_manifest(
    zip: &mut ZipWriter<std::io::Cursor<&mut Vec<u8>>>,
    options: SimpleFileOptions,
    entries: &[ManifestEntry],
) -> Result<()> {
    let mut manifest = String::new();
    for entry in entries {
        manifest.push_str(&entry.original_name);
        manifest.push('\n');
        manifest.push_str(&entry.translated_name);
        manifest.push_str("\n\n");
    }
    write_entry(zip, options, "list.txt", manifest.as_bytes())
}

/// Original-file path for a confirmed material: the uploaded file for
/// images, the shared session PDF for webpages/PDF pages.
fn original_path_of(material: &Material) -> Option<String> {
    material.original_pdf_path.clone().or_else(|| material.file_path.clone())
}

/// Final translated artifact: the browser-produced composite if the user
/// edited regions, else the webpage capture's translated PDF, else the
/// pipeline's own output file. Rendering edited images server-side is out
/// of scope here, so this never synthesizes a new artifact.
fn translated_path_of(material: &Material) -> Option<String> {
    material
        .final_image_path
        .clone()
        .or_else(|| material.translated_image_path.clone())
        .or_else(|| material.file_path.clone())
}

fn filename_stem(material: &Material) -> String {
    let name = material
        .original_filename
        .clone()
        .or_else(|| material.file_path.as_deref().map(|p| p.to_string()))
        .unwrap_or_else(|| material.id.clone());
    let stem = std::path::Path::new(&name)
        .file_stem()
        .and_then(|s| s.to_str())
        .unwrap_or(&name)
        .to_string();
    sanitize_filename(&stem)
}

fn extension_of(path: &str) -> String {
    std::path::Path::new(path)
        .extension()
        .and_then(|e| e.to_str())
        .unwrap_or("bin")
        .to_string()
}

fn sanitize_filename(name: &str) -> String {
    name.chars()
        .map(|c| if c == '/' || c == '\\' || c == '\0' { '_' } else { c })
        .collect()
}

/// Wrap a single JPEG image in a minimal one-page PDF, so a PDF session's
/// per-page JPEG composites can be merged with `combine_pdfs`.
fn jpeg_to_single_page_pdf(jpeg_bytes: &[u8]) -> Result<Vec<u8>> {
    let dims = image::load_from_memory(jpeg_bytes).map_err(|e| Error::Export(format!("failed to read page image: {e}")))?;
    let (width, height) = (i64::from(dims.width()), i64::from(dims.height()));

    let mut doc = lopdf::Document::with_version("1.5");

    let image_dict = lopdf::Dictionary::from_iter([
        ("Type", lopdf::Object::Name(b"XObject".to_vec())),
        ("Subtype", lopdf::Object::Name(b"Image".to_vec())),
        ("Width", lopdf::Object::Integer(i64::from(dims.width()))),
        ("Height", lopdf::Object::Integer(i64::from(dims.height()))),
        ("ColorSpace", lopdf::Object::Name(b"DeviceRGB".to_vec())),
        ("BitsPerComponent", lopdf::Object::Integer(8)),
        ("Filter", lopdf::Object::Name(b"DCTDecode".to_vec())),
    ]);
    let image_id = doc.add_object(lopdf::Stream::new(image_dict, jpeg_bytes.to_vec()));

    let resources_id = doc.add_object(lopdf::Dictionary::from_iter([(
        "XObject",
        lopdf::Object::Dictionary(lopdf::Dictionary::from_iter([("Im0", lopdf::Object::Reference(image_id))])),
    )]));

    let content = lopdf::content::Content {
        operations: vec![
            lopdf::content::Operation::new("q", vec![]),
            lopdf::content::Operation::new(
                "cm",
                vec![
                    lopdf::Object::Integer(width),
                    lopdf::Object::Integer(0),
                    lopdf::Object::Integer(0),
                    lopdf::Object::Integer(height),
                    lopdf::Object::Integer(0),
                    lopdf::Object::Integer(0),
                ],
            ),
            lopdf::content::Operation::new("Do", vec!["Im0".into()]),
            lopdf::content::Operation::new("Q", vec![]),
        ],
    };
    let content_bytes = content.encode().map_err(|e| Error::Export(format!("failed to encode page content: {e}")))?;
    let content_id = doc.add_object(lopdf::Stream::new(lopdf::Dictionary::new(), content_bytes));

    let page_tree_id = doc.new_object_id();
    let page_id = doc.add_object(lopdf::Dictionary::from_iter([
        ("Type", lopdf::Object::Name(b"Page".to_vec())),
        ("Parent", lopdf::Object::Reference(page_tree_id)),
        ("Contents", lopdf::Object::Reference(content_id)),
        ("Resources", lopdf::Object::Reference(resources_id)),
        (
            "MediaBox",
            lopdf::Object::Array(vec![
                lopdf::Object::Integer(0),
                lopdf::Object::Integer(0),
                lopdf::Object::Integer(width),
                lopdf::Object::Integer(height),
            ]),
        ),
    ]));
    doc.objects.insert(
        page_tree_id,
        lopdf::Object::Dictionary(lopdf::Dictionary::from_iter([
            ("Type", lopdf::Object::Name(b"Pages".to_vec())),
            ("Kids", lopdf::Object::Array(vec![lopdf::Object::Reference(page_id)])),
            ("Count", lopdf::Object::Integer(1)),
        ])),
    );

    let catalog_id = doc.add_object(lopdf::Dictionary::from_iter([
        ("Type", lopdf::Object::Name(b"Catalog".to_vec())),
        ("Pages", lopdf::Object::Reference(page_tree_id)),
    ]));
    doc.trailer.set("Root", lopdf::Object::Reference(catalog_id));

    let mut output = Vec::new();
    doc.save_to(&mut output).map_err(|e| Error::Export(format!("failed to save page pdf: {e}")))?;
    Ok(output)
}

#[cfg(test)]
mod tests {
    use super::*;

    fn sample_jpeg() -> Vec<u8> {
        let img = image::RgbaImage::from_pixel(16, 8, image::Rgba([200, 10, 10, 255]));
        let mut buf = Vec::new();
        image::DynamicImage::ImageRgba8(img)
            .write_to(&mut std::io::Cursor::new(&mut buf), image::ImageFormat::Jpeg)
            .unwrap();
        buf
    }

    #[test]
    fn jpeg_to_single_page_pdf_produces_one_page() {
        let jpeg = sample_jpeg();
        let pdf = jpeg_to_single_page_pdf(&jpeg).unwrap();
        let doc = lopdf::Document::load_mem(&pdf).unwrap();
        assert_eq!(doc.get_pages().len(), 1);
    }

    #[test]
    fn extension_of_falls_back_to_bin() {
        assert_eq!(extension_of("/tmp/material/page.jpg"), "jpg");
        assert_eq!(extension_of("/tmp/material/noext"), "bin");
    }

    #[test]
    fn sanitize_filename_strips_path_separators() {
        assert_eq!(sanitize_filename("a/b\\c"), "a_b_c");
    }
}
