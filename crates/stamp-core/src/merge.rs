//! Page merge
//!
//! Composites an overlay page onto a page of a target document in place.
//!
//! The algorithm:
//! 1. Import every overlay object into the target with an ID offset
//! 2. Turn the overlay's content stream into a Form XObject carrying the
//!    overlay resources, drop the overlay's own page tree objects
//! 3. Register the form in the target page's resources under a fresh name
//! 4. Wrap the existing page contents in `q ... Q` and append a draw call
//! 5. Re-read the page geometry and fail if anything moved
//!
//! The target page's Rotate, MediaBox and CropBox are never written.

use lopdf::content::{Content, Operation};
use lopdf::{dictionary, Dictionary, Document, Object, ObjectId, Stream};
use tracing::debug;

use crate::error::StampError;
use crate::geometry::{inherited_attribute, PageGeometry};
use crate::overlay::Overlay;

const OVERLAY_NAME_PREFIX: &str = "StampOverlay";

/// Composites overlay pages onto target pages
#[derive(Debug, Clone, Copy, Default)]
pub struct PageMerger;

impl PageMerger {
    pub fn new() -> Self {
        Self
    }

    /// Merge `overlay` onto `page_id` of `target`.
    ///
    /// Merging twice stacks two overlays; nothing is replaced.
    ///
    /// A page that cannot be read fails before `target` is touched. Failures
    /// after the import leave the imported objects in `target`, so the caller
    /// must discard the document on any error.
    pub fn merge(
        &self,
        target: &mut Document,
        page_id: ObjectId,
        overlay: Overlay,
    ) -> Result<(), StampError> {
        let before = PageGeometry::from_page(target, page_id)?;

        let form_id = import_overlay_as_form(target, overlay, before.media_origin)?;
        let name = register_form(target, page_id, form_id)?;
        wrap_page_contents(target, page_id, &name)?;

        let after = PageGeometry::from_page(target, page_id)?;
        if after != before {
            return Err(StampError::MergeFailure(format!(
                "Page geometry changed during merge: {:?} -> {:?}",
                before, after
            )));
        }

        debug!(page = ?page_id, xobject = %name, "Merged overlay");
        Ok(())
    }
}

/// Copy overlay objects into `target` and return the ID of the Form XObject
/// built from the overlay page.
fn import_overlay_as_form(
    target: &mut Document,
    overlay: Overlay,
    media_origin: (f64, f64),
) -> Result<ObjectId, StampError> {
    let Overlay {
        document: source,
        page_id: source_page_id,
        width_pt,
        height_pt,
        ..
    } = overlay;

    let source_page = source
        .get_object(source_page_id)
        .and_then(Object::as_dict)
        .map_err(|e| StampError::MergeFailure(format!("Overlay page missing: {}", e)))?;
    let content_id = source_page
        .get(b"Contents")
        .and_then(Object::as_reference)
        .map_err(|e| StampError::MergeFailure(format!("Overlay contents missing: {}", e)))?;
    let resources = source_page
        .get(b"Resources")
        .cloned()
        .unwrap_or_else(|_| Object::Dictionary(Dictionary::new()));

    // Page tree scaffolding of the overlay document is not imported
    let mut skipped = vec![source_page_id];
    if let Ok(pages_id) = source_page.get(b"Parent").and_then(Object::as_reference) {
        skipped.push(pages_id);
    }
    if let Ok(root_id) = source.trailer.get(b"Root").and_then(Object::as_reference) {
        skipped.push(root_id);
    }

    let id_offset = target.max_id;
    let shift = |id: ObjectId| (id.0 + id_offset, id.1);

    let content = match source.get_object(content_id) {
        Ok(Object::Stream(stream)) => stream.content.clone(),
        _ => {
            return Err(StampError::MergeFailure(
                "Overlay contents is not a stream".to_string(),
            ))
        }
    };

    let source_max_id = source.max_id;
    for (id, object) in source.objects.into_iter() {
        if skipped.contains(&id) || id == content_id {
            continue;
        }
        target.objects.insert(shift(id), remap_object_refs(object, id_offset));
    }

    let form = Stream::new(
        dictionary! {
            "Type" => "XObject",
            "Subtype" => "Form",
            "BBox" => vec![
                0.into(),
                0.into(),
                Object::Real(width_pt as f32),
                Object::Real(height_pt as f32),
            ],
            "Matrix" => vec![
                1.into(),
                0.into(),
                0.into(),
                1.into(),
                Object::Real(media_origin.0 as f32),
                Object::Real(media_origin.1 as f32),
            ],
            "Resources" => remap_object_refs(resources, id_offset),
        },
        content,
    );
    let form_id = shift(content_id);
    target.objects.insert(form_id, Object::Stream(form));
    target.max_id = target.max_id.max(source_max_id + id_offset);

    Ok(form_id)
}

/// Recursively shift object references by `offset`
fn remap_object_refs(obj: Object, offset: u32) -> Object {
    match obj {
        Object::Reference(id) => Object::Reference((id.0 + offset, id.1)),
        Object::Array(arr) => Object::Array(
            arr.into_iter()
                .map(|o| remap_object_refs(o, offset))
                .collect(),
        ),
        Object::Dictionary(mut dict) => {
            remap_dict(&mut dict, offset);
            Object::Dictionary(dict)
        }
        Object::Stream(mut stream) => {
            remap_dict(&mut stream.dict, offset);
            Object::Stream(stream)
        }
        other => other,
    }
}

fn remap_dict(dict: &mut Dictionary, offset: u32) {
    for (_, value) in dict.iter_mut() {
        let taken = std::mem::replace(value, Object::Null);
        *value = remap_object_refs(taken, offset);
    }
}

/// Add the form to the page's XObject resources under the first free
/// `StampOverlayN` name and return that name.
///
/// Resource dictionaries reached through references or inheritance may be
/// shared with other pages, so they are copied onto the page before editing.
fn register_form(
    doc: &mut Document,
    page_id: ObjectId,
    form_id: ObjectId,
) -> Result<String, StampError> {
    let page_dict = page_dict(doc, page_id)?;

    let mut resources = match inherited_attribute(doc, page_dict, b"Resources") {
        Some(obj) => resolve_dict(doc, obj)?,
        None => Dictionary::new(),
    };
    let mut xobjects = match resources.get(b"XObject") {
        Ok(obj) => resolve_dict(doc, obj)?,
        Err(_) => Dictionary::new(),
    };

    let name = (0..)
        .map(|n| format!("{}{}", OVERLAY_NAME_PREFIX, n))
        .find(|candidate| !xobjects.has(candidate.as_bytes()))
        .unwrap_or_else(|| OVERLAY_NAME_PREFIX.to_string());

    xobjects.set(name.clone(), form_id);
    resources.set("XObject", xobjects);

    doc.get_object_mut(page_id)
        .and_then(Object::as_dict_mut)
        .map_err(|e| StampError::MergeFailure(format!("Page {:?}: {}", page_id, e)))?
        .set("Resources", resources);

    Ok(name)
}

/// Replace the page contents with `[q, existing..., Q /Name Do]`
fn wrap_page_contents(doc: &mut Document, page_id: ObjectId, name: &str) -> Result<(), StampError> {
    let existing: Vec<Object> = match page_dict(doc, page_id)?.get(b"Contents") {
        Ok(Object::Reference(id)) => match doc.get_object(*id) {
            // An indirect array of streams is flattened
            Ok(Object::Array(arr)) => arr.clone(),
            _ => vec![Object::Reference(*id)],
        },
        Ok(Object::Array(arr)) => arr.clone(),
        Ok(_) => {
            return Err(StampError::MergeFailure(format!(
                "Page {:?} has unsupported Contents",
                page_id
            )))
        }
        Err(_) => Vec::new(),
    };

    let save = encode_ops(vec![Operation::new("q", vec![])])?;
    let draw = encode_ops(vec![
        Operation::new("Q", vec![]),
        Operation::new("q", vec![]),
        Operation::new("Do", vec![Object::Name(name.as_bytes().to_vec())]),
        Operation::new("Q", vec![]),
    ])?;

    let save_id = doc.add_object(Stream::new(Dictionary::new(), save));
    let draw_id = doc.add_object(Stream::new(Dictionary::new(), draw));

    let mut contents = Vec::with_capacity(existing.len() + 2);
    contents.push(Object::Reference(save_id));
    contents.extend(existing);
    contents.push(Object::Reference(draw_id));

    doc.get_object_mut(page_id)
        .and_then(Object::as_dict_mut)
        .map_err(|e| StampError::MergeFailure(format!("Page {:?}: {}", page_id, e)))?
        .set("Contents", contents);

    Ok(())
}

fn encode_ops(operations: Vec<Operation>) -> Result<Vec<u8>, StampError> {
    Content { operations }
        .encode()
        .map_err(|e| StampError::MergeFailure(format!("Content encode: {}", e)))
}

fn page_dict(doc: &Document, page_id: ObjectId) -> Result<&Dictionary, StampError> {
    doc.get_object(page_id)
        .and_then(Object::as_dict)
        .map_err(|e| StampError::MergeFailure(format!("Page {:?}: {}", page_id, e)))
}

fn resolve_dict(doc: &Document, obj: &Object) -> Result<Dictionary, StampError> {
    match obj {
        Object::Dictionary(dict) => Ok(dict.clone()),
        Object::Reference(id) => doc
            .get_object(*id)
            .and_then(Object::as_dict)
            .cloned()
            .map_err(|e| StampError::MergeFailure(format!("Resource {:?}: {}", id, e))),
        _ => Err(StampError::MergeFailure(
            "Resources entry is not a dictionary".to_string(),
        )),
    }
}
