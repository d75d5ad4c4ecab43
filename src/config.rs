use crate::{
    decompressors::Options as DecompressionOptions,
    hook::{DataHook, FileDataHook, LogHook, TxHook},
    log::Level,
    unicode_bestfit_map::UnicodeBestfitMap,
};

/// Hard limit, in bytes, for buffering any single line or header region
/// across input chunks. Exceeding it is a fatal parse error.
pub const DEFAULT_FIELD_LIMIT: usize = 18000;

/// What the origin server is expected to do when it encounters a given
/// anomaly. Recorded on the transaction, never acted upon by the parser.
#[derive(Copy, Clone, PartialEq, Debug)]
pub enum Unwanted {
    /// Anomaly tolerated silently.
    Ignore,
    /// Server would reject with 400.
    Code400,
    /// Server would reject with 404.
    Code404,
}

/// Handling of `%` sequences that do not decode cleanly.
#[derive(Copy, Clone, PartialEq, Debug)]
pub enum UrlEncodingHandling {
    /// Leave the percent character in the output.
    PreservePercent,
    /// Eat the percent character, keep the rest.
    RemovePercent,
    /// Decode the invalid sequence anyway.
    DecodeInvalid,
    /// Preserve, and note that the server would answer 400.
    Status400,
}

/// Options steering URI path and query decoding.
#[derive(Copy, Clone)]
pub struct DecoderConfig {
    /// Treat backslashes as path separators and rewrite them to `/`.
    pub backslash_convert_slashes: bool,
    /// Lowercase ASCII in the decoded path.
    pub convert_lowercase: bool,
    /// Collapse runs of `/` in the decoded path.
    pub path_separators_compress: bool,
    /// Decode `%2F` (and `%5C` when backslashes are separators) instead of
    /// preserving the encoded form.
    pub path_separators_decode: bool,
    /// Recognize IIS-style `%uHHHH` sequences.
    pub u_encoding_decode: bool,
    pub u_encoding_unwanted: Unwanted,
    pub url_encoding_invalid_handling: UrlEncodingHandling,
    pub url_encoding_invalid_unwanted: Unwanted,
    /// Terminate the path at a decoded NUL.
    pub nul_encoded_terminates: bool,
    pub nul_encoded_unwanted: Unwanted,
    /// Terminate the path at a raw NUL.
    pub nul_raw_terminates: bool,
    pub nul_raw_unwanted: Unwanted,
    pub control_chars_unwanted: Unwanted,
    /// Replace UTF-8 sequences with their best-fit single-byte mapping;
    /// when false the path is only validated.
    pub utf8_convert_bestfit: bool,
    pub utf8_invalid_unwanted: Unwanted,
    pub bestfit_map: UnicodeBestfitMap,
}

impl Default for DecoderConfig {
    fn default() -> Self {
        Self {
            backslash_convert_slashes: false,
            convert_lowercase: false,
            path_separators_compress: false,
            path_separators_decode: false,
            u_encoding_decode: false,
            u_encoding_unwanted: Unwanted::Ignore,
            url_encoding_invalid_handling: UrlEncodingHandling::PreservePercent,
            url_encoding_invalid_unwanted: Unwanted::Ignore,
            nul_encoded_terminates: false,
            nul_encoded_unwanted: Unwanted::Ignore,
            nul_raw_terminates: false,
            nul_raw_unwanted: Unwanted::Ignore,
            control_chars_unwanted: Unwanted::Ignore,
            utf8_convert_bestfit: false,
            utf8_invalid_unwanted: Unwanted::Ignore,
            bestfit_map: UnicodeBestfitMap::default(),
        }
    }
}

/// Parser configuration. Immutable once a `ConnectionParser` is opened;
/// hooks registered here observe every transaction on the connection.
#[derive(Clone)]
pub struct Config {
    /// Hard buffering limit for lines and header regions.
    pub field_limit: usize,
    /// Messages above this level are dropped.
    pub log_level: Level,
    /// URI decoding options.
    pub decoder: DecoderConfig,
    /// Response decompression options.
    pub compression: DecompressionOptions,
    /// Decompress recognized response Content-Encodings.
    pub response_decompression: bool,
    /// Parse Authorization request headers.
    pub parse_request_auth: bool,
    /// Detect multipart/form-data request bodies and run boundary matching.
    pub parse_multipart: bool,
    /// Surface PUT request bodies through the file-data hook.
    pub extract_request_files: bool,

    pub hook_transaction_start: TxHook,
    pub hook_request_line: TxHook,
    pub hook_request_uri_normalize: TxHook,
    pub hook_request_headers: TxHook,
    pub hook_request_header_data: DataHook,
    pub hook_request_body_data: DataHook,
    pub hook_request_file_data: FileDataHook,
    pub hook_request_trailer: TxHook,
    pub hook_request_trailer_data: DataHook,
    pub hook_request_complete: TxHook,
    pub hook_response_start: TxHook,
    pub hook_response_line: TxHook,
    pub hook_response_headers: TxHook,
    pub hook_response_header_data: DataHook,
    pub hook_response_body_data: DataHook,
    pub hook_response_trailer: TxHook,
    pub hook_response_trailer_data: DataHook,
    pub hook_response_complete: TxHook,
    pub hook_transaction_complete: TxHook,
    pub hook_log: LogHook,
}

impl Default for Config {
    fn default() -> Self {
        Self {
            field_limit: DEFAULT_FIELD_LIMIT,
            log_level: Level::Notice,
            decoder: DecoderConfig::default(),
            compression: DecompressionOptions::default(),
            response_decompression: true,
            parse_request_auth: true,
            parse_multipart: false,
            extract_request_files: false,
            hook_transaction_start: TxHook::default(),
            hook_request_line: TxHook::default(),
            hook_request_uri_normalize: TxHook::default(),
            hook_request_headers: TxHook::default(),
            hook_request_header_data: DataHook::default(),
            hook_request_body_data: DataHook::default(),
            hook_request_file_data: FileDataHook::default(),
            hook_request_trailer: TxHook::default(),
            hook_request_trailer_data: DataHook::default(),
            hook_request_complete: TxHook::default(),
            hook_response_start: TxHook::default(),
            hook_response_line: TxHook::default(),
            hook_response_headers: TxHook::default(),
            hook_response_header_data: DataHook::default(),
            hook_response_body_data: DataHook::default(),
            hook_response_trailer: TxHook::default(),
            hook_response_trailer_data: DataHook::default(),
            hook_response_complete: TxHook::default(),
            hook_transaction_complete: TxHook::default(),
            hook_log: LogHook::default(),
        }
    }
}

impl Config {
    pub fn new() -> Self {
        Self::default()
    }

    /// Enables multipart/form-data boundary detection on request bodies.
    pub fn register_multipart_parser(&mut self) {
        self.parse_multipart = true;
    }

    /// Enables the PUT upload file channel.
    pub fn register_file_extraction(&mut self) {
        self.extract_request_files = true;
    }
}
