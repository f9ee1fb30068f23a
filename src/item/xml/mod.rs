/// Streaming XML record source.
///
/// Documents are read forward-only with `quick-xml`. Each repeating item
/// element is expanded into an [`xml_reader::XmlNode`] tree on its own, so
/// memory use is bounded by the largest item, not the document.
pub mod xml_reader;

pub use xml_reader::XmlNode;
