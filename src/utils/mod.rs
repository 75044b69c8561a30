//! Pure helpers shared by the router, parsers and facade.

pub mod normalizacao;

pub use normalizacao::{
    calcular_digito_verificador_cnj, dobrar_texto, formatar_cnpj, formatar_cpf, limpar_texto,
    normalizar_cnpj, normalizar_cpf, normalizar_numero_processo, parsear_data,
    parsear_valor_monetario, parsear_valor_opcional, segmentos_cnj, somente_digitos,
    validar_cnpj, validar_cpf, validar_numero_cnj, SegmentosCnj,
};
