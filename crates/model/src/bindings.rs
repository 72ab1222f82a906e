//! Tensor names exchanged with each exported segment.

pub mod text_embedder {
    pub const INPUT_IDS: &str = "input_ids";
    pub const IDS_LEN: &str = "ids_len";
    pub const HIDDEN_STATES: &str = "hidden_states";
}

pub mod position_ids {
    pub const DUMMY: &str = "dummy";
    pub const POSITION_IDS: &str = "position_ids";
}

pub mod vision_encoder {
    pub const PIXEL_VALUES: &str = "pixel_values";
    pub const IMAGE_EMBED: &str = "image_embed";
}

pub mod vision_merger {
    pub const HIDDEN_STATES_IN: &str = "hidden_states.1";
    pub const IMAGE_EMBED: &str = "image_embed";
    pub const IDS_LEN: &str = "ids_len";
    pub const IDS_LEN_MINUS: &str = "ids_len_minus";
    pub const SPLIT_FACTOR: &str = "split_factor";
    pub const HIDDEN_STATES: &str = "hidden_states";
    pub const POSITION_IDS: &str = "position_ids";
}

pub mod decoder {
    pub const HIDDEN_STATES: &str = "hidden_states";
    pub const ATTENTION_MASK: &str = "attention_mask";
    pub const PAST_KEYS_IN: &str = "past_key_states.1";
    pub const PAST_VALUES_IN: &str = "past_value_states.1";
    pub const HISTORY_LEN: &str = "history_len";
    pub const IDS_LEN: &str = "ids_len";
    pub const POSITION_IDS: &str = "position_ids";
    pub const POS_FACTOR: &str = "pos_factor";
    pub const MAX_LOGIT_IDS: &str = "max_logit_ids";
    pub const PAST_KEYS: &str = "past_key_states";
    pub const PAST_VALUES: &str = "past_value_states";
}
