// Copyright (c) 2021 Marco Boneberger
// Licensed under the EUPL-1.2-or-later

//! Contains the ServiceDefinition type.
use crate::exception::{GripperException, GripperResult};

/// The parts of a service definition text a host needs to register services.
///
/// A definition has one `service <name>` line, optional `option` lines and any number of
/// `object <name>` ... `end object` blocks. Lines starting with `#` are comments.
#[derive(Debug, Clone, PartialEq)]
pub struct ServiceDefinition {
    pub name: String,
    pub version: Option<String>,
    pub objects: Vec<String>,
    text: String,
}

impl ServiceDefinition {
    pub fn parse(text: &str) -> GripperResult<ServiceDefinition> {
        let mut name: Option<String> = None;
        let mut version = None;
        let mut objects = Vec::new();
        let mut open_object: Option<String> = None;

        for (number, line) in text.lines().enumerate() {
            let line = line.trim();
            if line.is_empty() || line.starts_with('#') {
                continue;
            }
            let words: Vec<&str> = line.split_whitespace().collect();
            match words.as_slice() {
                ["service", service_name] => {
                    if name.is_some() {
                        return Err(definition_error(number, "more than one service line"));
                    }
                    name = Some(service_name.to_string());
                }
                ["option", "version", service_version] => {
                    version = Some(service_version.to_string());
                }
                ["option", ..] => {}
                ["object", object_name] => {
                    if let Some(open) = &open_object {
                        return Err(definition_error(
                            number,
                            &format!("object {} is not closed", open),
                        ));
                    }
                    open_object = Some(object_name.to_string());
                }
                ["end", "object"] | ["end"] => match open_object.take() {
                    Some(object_name) => objects.push(object_name),
                    None => return Err(definition_error(number, "end without object")),
                },
                _ => {
                    if open_object.is_none() {
                        return Err(definition_error(
                            number,
                            &format!("member outside of an object: {}", line),
                        ));
                    }
                }
            }
        }
        if let Some(open) = open_object {
            return Err(GripperException::ServiceException {
                message: format!("service definition: object {} is not closed", open),
            });
        }
        let name = name.ok_or_else(|| GripperException::ServiceException {
            message: "service definition: missing service line".to_string(),
        })?;
        Ok(ServiceDefinition {
            name,
            version,
            objects,
            text: text.to_string(),
        })
    }

    /// Fully qualified names `<service>.<object>` of all objects.
    pub fn qualified_types(&self) -> Vec<String> {
        self.objects
            .iter()
            .map(|object| format!("{}.{}", self.name, object))
            .collect()
    }

    pub fn text(&self) -> &str {
        &self.text
    }
}

fn definition_error(line_index: usize, message: &str) -> GripperException {
    GripperException::ServiceException {
        message: format!("service definition line {}: {}", line_index + 1, message),
    }
}

#[cfg(test)]
mod tests {
    use crate::exception::GripperException;
    use crate::gripper::SERVICE_DEFINITION;
    use crate::server::service_definition::ServiceDefinition;

    #[test]
    fn parses_gripper_definition() {
        let definition = ServiceDefinition::parse(SERVICE_DEFINITION).unwrap();
        assert_eq!(definition.name, "Gripper_Interface");
        assert_eq!(definition.version.as_deref(), Some("0.4"));
        assert_eq!(definition.objects, vec!["Gripper".to_string()]);
        assert_eq!(
            definition.qualified_types(),
            vec!["Gripper_Interface.Gripper".to_string()]
        );
        assert_eq!(definition.text(), SERVICE_DEFINITION);
    }

    #[test]
    fn rejects_broken_definitions() {
        let broken = [
            "object Gripper\nend object\n",
            "service A\nobject Gripper\nfunction void closeGrip()\n",
            "service A\nfunction void closeGrip()\n",
            "service A\nservice B\n",
            "service A\nend object\n",
        ];
        for text in broken.iter() {
            match ServiceDefinition::parse(text) {
                Err(GripperException::ServiceException { .. }) => {}
                other => panic!("expected ServiceException for {:?} but found {:?}", text, other),
            }
        }
    }
}
