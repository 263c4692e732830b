//! PDF page merging, used by the Export Packager to combine a
//! PDF material's page composites back into a single multi-page PDF.

use std::collections::BTreeMap;

use lopdf::{Document, Object, ObjectId};

use crate::error::{Error, Result};

/// Combine multiple single-page PDFs into one document.
pub fn combine_pdfs(pages: &[Vec<u8>]) -> Result<Vec<u8>> {
    if pages.is_empty() {
        return Err(Error::Export("no pages to combine".to_string()));
    }

    if pages.len() == 1 {
        return Ok(pages[0].clone());
    }

    let mut max_id: u32 = 1;
    let mut documents_pages: BTreeMap<ObjectId, Object> = BTreeMap::new();
    let mut documents_objects: BTreeMap<ObjectId, Object> = BTreeMap::new();
    let mut document = Document::with_version("1.5");

    for (i, page_bytes) in pages.iter().enumerate() {
        let mut doc = Document::load_mem(page_bytes)
            .map_err(|e| Error::Lopdf(format!("failed to load page {}: {}", i + 1, e)))?;

        doc.renumber_objects_with(max_id);
        max_id = doc.max_id + 1;

        let source_pages = doc.get_pages();
        for &page_id in source_pages.values() {
            if let Ok(page_obj) = doc.get_object(page_id) {
                documents_pages.insert(page_id, page_obj.clone());
            }
        }

        for (object_id, object) in doc.objects {
            match object.type_name().unwrap_or(b"") {
                b"Catalog" | b"Pages" | b"Page" | b"Outlines" | b"Outline" => {}
                _ => {
                    documents_objects.insert(object_id, object);
                }
            }
        }
    }

    for (object_id, object) in documents_objects {
        document.objects.insert(object_id, object);
    }

    let pages_id = document.new_object_id();

    for (obj_id, object) in &documents_pages {
        if let Object::Dictionary(dict) = object {
            let mut new_dict = dict.clone();
            new_dict.set("Parent", Object::Reference(pages_id));
            document.objects.insert(*obj_id, Object::Dictionary(new_dict));
        }
    }

    let kids: Vec<Object> = documents_pages.keys().map(|&id| Object::Reference(id)).collect();

    #[allow(clippy::cast_possible_truncation)]
    let total_pages = documents_pages.len() as u32;

    let pages_dict_obj = lopdf::Dictionary::from_iter([
        ("Type", Object::Name(b"Pages".to_vec())),
        ("Kids", Object::Array(kids)),
        ("Count", Object::Integer(i64::from(total_pages))),
    ]);
    document.objects.insert(pages_id, Object::Dictionary(pages_dict_obj));

    let catalog_id = document.new_object_id();
    let catalog_dict_obj = lopdf::Dictionary::from_iter([
        ("Type", Object::Name(b"Catalog".to_vec())),
        ("Pages", Object::Reference(pages_id)),
    ]);
    document.objects.insert(catalog_id, Object::Dictionary(catalog_dict_obj));

    document.trailer.set("Root", Object::Reference(catalog_id));

    #[allow(clippy::cast_possible_truncation)]
    let new_max_id = document.objects.len() as u32;
    document.max_id = new_max_id;

    document.renumber_objects();
    document.compress();

    let mut output = Vec::new();
    document.save_to(&mut output).map_err(|e| Error::Export(format!("failed to save combined PDF: {e}")))?;

    Ok(output)
}

#[cfg(test)]
#[allow(clippy::unwrap_used)]
mod tests {
    use super::*;
    use lopdf::content::{Content, Operation};
    use lopdf::Stream;

    fn create_test_pdf(page_text: &str) -> Vec<u8> {
        let mut doc = Document::with_version("1.5");
        let page_tree_id = doc.new_object_id();

        let font_id = doc.add_object(lopdf::Dictionary::from_iter([
            ("Type", Object::Name(b"Font".to_vec())),
            ("Subtype", Object::Name(b"Type1".to_vec())),
            ("BaseFont", Object::Name(b"Helvetica".to_vec())),
        ]));

        let resources_id = doc.add_object(lopdf::Dictionary::from_iter([(
            "Font",
            Object::Dictionary(lopdf::Dictionary::from_iter([("F1", Object::Reference(font_id))])),
        )]));

        let content = Content {
            operations: vec![
                Operation::new("BT", vec![]),
                Operation::new("Tf", vec!["F1".into(), 24.into()]),
                Operation::new("Td", vec![100.into(), 700.into()]),
                Operation::new("Tj", vec![Object::string_literal(page_text)]),
                Operation::new("ET", vec![]),
            ],
        };

        let content_bytes = content.encode().unwrap_or_default();
        let content_id = doc.add_object(Stream::new(lopdf::Dictionary::new(), content_bytes));

        let single_page_id = doc.add_object(lopdf::Dictionary::from_iter([
            ("Type", Object::Name(b"Page".to_vec())),
            ("Parent", Object::Reference(page_tree_id)),
            ("Contents", Object::Reference(content_id)),
            ("Resources", Object::Reference(resources_id)),
            ("MediaBox", Object::Array(vec![0.into(), 0.into(), 612.into(), 792.into()])),
        ]));

        let page_tree = lopdf::Dictionary::from_iter([
            ("Type", Object::Name(b"Pages".to_vec())),
            ("Kids", Object::Array(vec![Object::Reference(single_page_id)])),
            ("Count", Object::Integer(1)),
        ]);
        doc.objects.insert(page_tree_id, Object::Dictionary(page_tree));

        let catalog_id = doc.add_object(lopdf::Dictionary::from_iter([
            ("Type", Object::Name(b"Catalog".to_vec())),
            ("Pages", Object::Reference(page_tree_id)),
        ]));
        doc.trailer.set("Root", Object::Reference(catalog_id));

        let mut output = Vec::new();
        doc.save_to(&mut output).unwrap_or_default();
        output
    }

    #[test]
    fn combine_pdfs_rejects_empty_input() {
        let result = combine_pdfs(&[]);
        assert!(result.is_err());
    }

    #[test]
    fn combine_pdfs_single_page_is_passthrough() {
        let pdf1 = create_test_pdf("Page 1");
        let result = combine_pdfs(std::slice::from_ref(&pdf1));
        assert!(result.is_ok());
        assert_eq!(result.unwrap(), pdf1);
    }

    #[test]
    fn combine_pdfs_merges_multiple_single_page_documents() {
        let pdf1 = create_test_pdf("Page 1");
        let pdf2 = create_test_pdf("Page 2");
        let pdf3 = create_test_pdf("Page 3");

        let result = combine_pdfs(&[pdf1, pdf2, pdf3]);
        assert!(result.is_ok());

        let combined_bytes = result.unwrap();
        let combined_doc = Document::load_mem(&combined_bytes).unwrap();
        let pages = combined_doc.get_pages();
        assert_eq!(pages.len(), 3, "combined PDF should have 3 pages");
    }
}
