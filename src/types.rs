/// Unique record identifier as held by the record store.
/// Example: `65f1c0d2a9e4b1f3c8d7e6a5`
pub type RecordId = String;
/// Name of a categorical attribute on a product record.
/// Examples: `Silhouette`, `Back Style`, `Leg Visibility`
pub type AttributeName = String;
/// Categorical value of an attribute (also used for taxonomy options).
/// Examples: `Camelback`, `Tufted`, `Exposed`
pub type AttributeValue = String;
/// Identifier shared by every evaluation row and the summary of one completed session.
/// Example: `9c1e55b0d3a27f48`
pub type BatchId = String;
/// Record category; selects the taxonomy and tags the batch summary.
/// Examples: `sofa`, `coffee_table`, `accent_chair`
pub type CategoryId = String;
/// Zero-based position of a record inside the session sample.
/// Example: `17`
pub type SampleIndex = usize;
