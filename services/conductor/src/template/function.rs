use super::{OutputMapping, ParameterMapping};

pub(super) const TEMPLATE: &str = include_str!("../../templates/function.yaml");

pub(super) const PARAMETERS: &[ParameterMapping] = &[
    ParameterMapping::required("function_body", "body"),
    ParameterMapping::optional("function_description", "description"),
    ParameterMapping::optional("endpoint_id", "endpoint_id"),
    ParameterMapping::optional("nodepool_id", "nodepool_id"),
    ParameterMapping::required("function_replicas", "replicas"),
];

pub(super) const OUTPUTS: &[OutputMapping] = &[OutputMapping {
    heat_output: "api_address",
    attr: "api_address",
}];
