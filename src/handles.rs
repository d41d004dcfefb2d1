use slotmap::new_key_type;

new_key_type! {
    pub struct BodyKey;
    pub struct ForceKey;
    pub struct ElementKey;
}
