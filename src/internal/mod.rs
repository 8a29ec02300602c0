mod limited;
pub(crate) use limited::Group;
