use super::{OutputMapping, ParameterMapping};

pub(super) const TEMPLATE: &str = include_str!("../../templates/nodepool.yaml");

pub(super) const PARAMETERS: &[ParameterMapping] = &[
    ParameterMapping::required("flavor", "flavor"),
    ParameterMapping::required("image", "image"),
    ParameterMapping::optional("key_name", "key_name"),
    ParameterMapping::optional("host", "host"),
    ParameterMapping::required("node_count", "node_count"),
];

pub(super) const OUTPUTS: &[OutputMapping] = &[OutputMapping {
    heat_output: "node_addresses",
    attr: "node_addresses",
}];
